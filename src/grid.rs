use calamine::Data;
use serde::Deserialize;

/// One spreadsheet cell, reduced to the shapes the pipeline cares about.
/// Loader-specific variants (errors, dates) are folded in by the `From`
/// impls so the detection and aggregation code never sees them.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    /// Stringify for header matching and identity columns. Integral floats
    /// render without a fractional part so numeric student IDs survive the
    /// trip through a float-typed spreadsheet column.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Cell::Bool(b) => b.to_string(),
        }
    }

    /// Numeric view without the lenient zero-fill of `coerce_mark`.
    /// Used for config values where "unparsable" must stay visible.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    fn from_json(value: &serde_json::Value) -> Cell {
        match value {
            serde_json::Value::Null => Cell::Empty,
            serde_json::Value::Bool(b) => Cell::Bool(*b),
            serde_json::Value::Number(n) => Cell::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => {
                if s.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(s.clone())
                }
            }
            other => Cell::Text(other.to_string()),
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Cell {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => {
                if s.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(s.clone())
                }
            }
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => Cell::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            // Formula errors (#DIV/0! etc.) become unparsable text so a
            // marks column containing one coerces to zero with a flag.
            Data::Error(e) => Cell::Text(format!("{e:?}")),
        }
    }
}

/// Lenient mark coercion. Returns the numeric value plus a flag telling the
/// caller that a non-empty value failed numeric parsing and was zero-filled.
/// Blank cells are missing marks, not coercions, so they come back unflagged.
/// Bool cells are layout noise in a marks column; they count 1/0 but flagged.
pub fn coerce_mark(cell: &Cell) -> (f64, bool) {
    match cell {
        Cell::Empty => (0.0, false),
        Cell::Number(n) => (*n, false),
        Cell::Text(s) => {
            let t = s.trim();
            if t.is_empty() {
                (0.0, false)
            } else {
                match t.parse::<f64>() {
                    Ok(v) => (v, false),
                    Err(_) => (0.0, true),
                }
            }
        }
        Cell::Bool(b) => (if *b { 1.0 } else { 0.0 }, true),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, Default)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// First sheet whose name contains `keyword` as a case-sensitive
    /// substring. Sheet names are lecturer-authored and the template uses
    /// fixed casing, so the match stays literal.
    pub fn sheet_containing(&self, keyword: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name.contains(keyword))
    }

    /// Keyword fallback chain: first keyword that matches any sheet wins.
    pub fn sheet_matching(&self, keywords: &[&str]) -> Option<&Sheet> {
        keywords.iter().find_map(|k| self.sheet_containing(k))
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }
}

/// JSON grid shape accepted over IPC, for shells that already hold the
/// workbook in memory and for tests that need no file fixtures.
#[derive(Debug, Deserialize)]
pub struct GridInput {
    pub sheets: Vec<GridSheetInput>,
}

#[derive(Debug, Deserialize)]
pub struct GridSheetInput {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl From<GridInput> for Workbook {
    fn from(input: GridInput) -> Workbook {
        let sheets = input
            .sheets
            .into_iter()
            .map(|s| Sheet {
                name: s.name,
                rows: s
                    .rows
                    .iter()
                    .map(|row| row.iter().map(Cell::from_json).collect())
                    .collect(),
            })
            .collect();
        Workbook { sheets }
    }
}
