use rust_xlsxwriter::{Format, Workbook};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl Cell {
    fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Number(number) if number.fract() == 0.0 => format!("{}", *number as i64),
            Self::Number(number) => format!("{number:.2}"),
        }
    }
}

impl From<&str> for Cell {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}
impl From<String> for Cell {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}
impl From<i64> for Cell {
    fn from(number: i64) -> Self {
        Self::Number(number as f64)
    }
}
impl From<u64> for Cell {
    fn from(number: u64) -> Self {
        Self::Number(number as f64)
    }
}
impl From<f64> for Cell {
    fn from(number: f64) -> Self {
        Self::Number(number)
    }
}

/// A named table with a fixed column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: &str, headers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            headers: headers.iter().map(|header| header.to_string()).collect(),
            rows: Vec::new(),
        }
    }
    pub fn push(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }
}

pub fn to_csv(sheet: &Sheet) -> Result<Vec<u8>, AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&sheet.headers)?;
    for row in sheet.rows.iter() {
        writer.write_record(row.iter().map(Cell::as_text))?;
    }
    writer
        .into_inner()
        .map_err(|error| AppError::Export(error.to_string()))
}

pub fn to_xlsx(sheets: &[Sheet]) -> Result<Vec<u8>, AppError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();

    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet.name.as_str())?;
        for (col, header) in sheet.headers.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, header.as_str(), &bold)?;
        }
        for (index, row) in sheet.rows.iter().enumerate() {
            let row_index = index as u32 + 1;
            for (col, cell) in row.iter().enumerate() {
                match cell {
                    Cell::Text(text) => worksheet.write_string(row_index, col as u16, text.as_str())?,
                    Cell::Number(number) => worksheet.write_number(row_index, col as u16, *number)?,
                };
            }
        }
    }
    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> Sheet {
        let mut sheet = Sheet::new("Safety Reports", &["Report ID", "Description", "Total"]);
        sheet.push(vec!["r1".into(), "Spill, near \"bay 3\"".into(), 4i64.into()]);
        sheet.push(vec!["r2".into(), "Guard missing".into(), 2.5f64.into()]);
        sheet
    }

    #[test]
    fn csv_keeps_column_order_and_quotes() {
        let csv = String::from_utf8(to_csv(&sheet()).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "Report ID,Description,Total");
        assert_eq!(lines[1], "r1,\"Spill, near \"\"bay 3\"\"\",4");
        assert_eq!(lines[2], "r2,Guard missing,2.50");
    }

    #[test]
    fn workbook_is_a_zip_container() {
        let notes = Sheet::new("Notes", &["date", "note"]);
        let bytes = to_xlsx(&[sheet(), notes]).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[test]
    fn invalid_sheet_name_fails() {
        let broken = Sheet::new("bad/name", &["a"]);
        assert!(matches!(to_xlsx(&[broken]), Err(AppError::Export(_))));
    }
}
