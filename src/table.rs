use comfy_table::presets::ASCII_MARKDOWN;
use comfy_table::{CellAlignment, Table};

/// Column alignment as written in the report tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

impl From<Align> for CellAlignment {
    fn from(align: Align) -> Self {
        match align {
            Align::Left => CellAlignment::Left,
            Align::Center => CellAlignment::Center,
            Align::Right => CellAlignment::Right,
        }
    }
}

/// A fixed-width Markdown table.
#[derive(Debug, Default)]
pub struct TextTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    alignment: Vec<(String, Align)>,
}

impl TextTable {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        TextTable {
            headers: headers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn align(mut self, column: &str, align: Align) -> Self {
        self.alignment.push((column.to_string(), align));
        self
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn render(&self) -> String {
        let mut table = Table::new();
        table.load_preset(ASCII_MARKDOWN).set_header(&self.headers);
        for row in &self.rows {
            table.add_row(row);
        }
        for (name, align) in &self.alignment {
            if let Some(index) = self.headers.iter().position(|h| h == name) {
                if let Some(column) = table.column_mut(index) {
                    column.set_cell_alignment((*align).into());
                }
            }
        }
        table.to_string()
    }
}
