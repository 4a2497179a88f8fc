//! Row-indexed writes into a spreadsheet tab.
//!
//! Row indices are 0-based and count data rows only: index `0` is the first
//! row below the header, i.e. spreadsheet row `2` in A1 notation.

use async_trait::async_trait;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::error::{Result, WizardError};

/// One spreadsheet row of cell values
pub type Row = Vec<Value>;

lazy_static! {
    static ref UPDATED_RANGE_REGEX: Regex = Regex::new(r"!\$?[A-Z]+\$?(\d+)").unwrap();
}

/// What a single call to the writer should do
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    /// Add a row after the existing content
    Append(Row),
    /// Overwrite exactly one data row
    UpdateAt { index: u32, row: Row },
    /// Clear every data row, then write these
    ReplaceAll(Vec<Row>),
}

impl WriteRequest {
    pub fn mode(&self) -> &'static str {
        match self {
            WriteRequest::Append(_) => "append",
            WriteRequest::UpdateAt { .. } => "update",
            WriteRequest::ReplaceAll(_) => "replace",
        }
    }
}

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteOutcome {
    /// Data row written, for single-row modes
    pub row_index: Option<u32>,
    /// Raw response from the backing service
    pub result: Value,
}

/// Body of `POST /sheets`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowWriteRequest {
    pub sheet_id: String,
    pub tab_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_data: Option<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
}

impl RowWriteRequest {
    pub fn new(sheet_id: &str, tab_name: &str, request: &WriteRequest) -> Self {
        let mut wire = Self {
            sheet_id: sheet_id.to_string(),
            tab_name: tab_name.to_string(),
            ..Self::default()
        };
        match request {
            WriteRequest::Append(row) => wire.row_data = Some(row.clone()),
            WriteRequest::UpdateAt { index, row } => {
                wire.row_data = Some(row.clone());
                wire.row_index = Some(*index);
            }
            WriteRequest::ReplaceAll(rows) => wire.rows = Some(rows.clone()),
        }
        wire
    }

    /// Resolves the optional fields into a tagged request. `rows` wins over
    /// `rowData`; `rowIndex` is ignored in bulk mode.
    pub fn into_request(self) -> Result<(String, String, WriteRequest)> {
        if self.sheet_id.trim().is_empty() || self.tab_name.trim().is_empty() {
            return Err(WizardError::BadRequest(
                "Missing required fields: sheetId, tabName, rowData[] or rows[]".to_string(),
            ));
        }
        let request = match (self.rows, self.row_data, self.row_index) {
            (Some(rows), _, _) => WriteRequest::ReplaceAll(rows),
            (None, Some(row), Some(index)) => WriteRequest::UpdateAt { index, row },
            (None, Some(row), None) => WriteRequest::Append(row),
            (None, None, _) => {
                return Err(WizardError::BadRequest(
                    "Missing required fields: sheetId, tabName, rowData[] or rows[]".to_string(),
                ));
            }
        };
        Ok((self.sheet_id, self.tab_name, request))
    }
}

/// Something that can write rows into a spreadsheet tab
#[async_trait]
pub trait SheetWriter: Send + Sync {
    async fn write(&self, sheet_id: &str, tab: &str, request: WriteRequest)
    -> Result<WriteOutcome>;
}

/// Spreadsheet row number (1-based, header on row 1) of a data row index
pub fn a1_row(index: u32) -> Result<u32> {
    index
        .checked_add(2)
        .ok_or_else(|| WizardError::BadRequest(format!("row index {} is out of range", index)))
}

/// Data row index from an updated range such as `'Client Info'!A7:D7`.
pub fn row_index_from_range(range: &str) -> Option<u32> {
    let bang = range.rfind('!')?;
    let caps = UPDATED_RANGE_REGEX.captures(&range[bang..])?;
    let row: u32 = caps[1].parse().ok()?;
    row.checked_sub(2)
}

/// Tab name quoted for A1 notation when it contains anything but word chars
pub fn quote_tab(tab: &str) -> String {
    if tab.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        tab.to_string()
    } else {
        format!("'{}'", tab.replace('\'', "''"))
    }
}

type Workbook = HashMap<String, Vec<Row>>;

/// In-process workbooks keyed by spreadsheet id. Each tab holds its header as
/// row 0 followed by data rows; writes follow the same rules as the remote
/// service.
#[derive(Debug, Default)]
pub struct MemorySheets {
    books: Mutex<HashMap<String, Workbook>>,
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a spreadsheet with the given tabs, each holding just a header row.
    pub fn create(&self, sheet_id: &str, tabs: &[(&str, Vec<&str>)]) {
        let book = tabs
            .iter()
            .map(|(tab, header)| {
                let header: Row = header.iter().map(|h| Value::String(h.to_string())).collect();
                (tab.to_string(), vec![header])
            })
            .collect();
        self.lock().insert(sheet_id.to_string(), book);
    }

    pub fn contains(&self, sheet_id: &str) -> bool {
        self.lock().contains_key(sheet_id)
    }

    /// Data rows of a tab (header excluded)
    pub fn data_rows(&self, sheet_id: &str, tab: &str) -> Option<Vec<Row>> {
        self.lock()
            .get(sheet_id)?
            .get(tab)
            .map(|rows| rows.iter().skip(1).cloned().collect())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Workbook>> {
        self.books.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SheetWriter for MemorySheets {
    async fn write(
        &self,
        sheet_id: &str,
        tab: &str,
        request: WriteRequest,
    ) -> Result<WriteOutcome> {
        let mut books = self.lock();
        let book = books.get_mut(sheet_id).ok_or_else(|| {
            WizardError::SheetWrite(format!("Requested entity was not found: {}", sheet_id))
        })?;
        let rows = book.get_mut(tab).ok_or_else(|| {
            WizardError::SheetWrite(format!("Unable to parse range: {}!A:Z", quote_tab(tab)))
        })?;
        debug!("memory write {} into {}/{}", request.mode(), sheet_id, tab);

        match request {
            WriteRequest::Append(row) => {
                rows.push(row);
                let index = rows.len().saturating_sub(2) as u32;
                let range = format!("{}!A{}", quote_tab(tab), a1_row(index)?);
                Ok(WriteOutcome {
                    row_index: Some(index),
                    result: json!({ "updates": { "updatedRange": range, "updatedRows": 1 } }),
                })
            }
            WriteRequest::UpdateAt { index, row } => {
                let range = format!("{}!A{}", quote_tab(tab), a1_row(index)?);
                let slot = rows.get_mut(index as usize + 1).ok_or_else(|| {
                    WizardError::SheetWrite(format!("Range ({}) exceeds grid limits", range))
                })?;
                *slot = row;
                Ok(WriteOutcome {
                    row_index: Some(index),
                    result: json!({ "updatedRange": range, "updatedRows": 1 }),
                })
            }
            WriteRequest::ReplaceAll(new_rows) => {
                let written = new_rows.len();
                rows.truncate(1);
                if rows.is_empty() {
                    rows.push(Row::new());
                }
                rows.extend(new_rows);
                Ok(WriteOutcome {
                    row_index: None,
                    result: json!({ "updatedRows": written }),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Row {
        values.iter().map(|v| json!(v)).collect()
    }

    fn workbook() -> MemorySheets {
        let sheets = MemorySheets::new();
        sheets.create(
            "sheet-1",
            &[
                ("ClientInfo", vec!["clientName", "billingName", "accountManager"]),
                ("Events", vec!["eventName", "eventType"]),
            ],
        );
        sheets
    }

    #[test]
    fn parses_updated_ranges() {
        assert_eq!(row_index_from_range("ClientInfo!A2:D2"), Some(0));
        assert_eq!(row_index_from_range("ClientInfo!A7"), Some(5));
        assert_eq!(row_index_from_range("'Client Basics'!$A$3:$D$3"), Some(1));
        assert_eq!(row_index_from_range("'Odd!Name'!B12:C12"), Some(10));
        assert_eq!(row_index_from_range("ClientInfo!A1"), None);
        assert_eq!(row_index_from_range("ClientInfo"), None);
    }

    #[test]
    fn a1_rows_sit_below_the_header() {
        assert_eq!(a1_row(0).unwrap(), 2);
        assert_eq!(a1_row(u32::MAX - 2).unwrap(), u32::MAX);
        assert!(matches!(a1_row(u32::MAX - 1), Err(WizardError::BadRequest(_))));
        assert!(matches!(a1_row(u32::MAX), Err(WizardError::BadRequest(_))));
    }

    #[test]
    fn quotes_tabs_with_spaces() {
        assert_eq!(quote_tab("ClientInfo"), "ClientInfo");
        assert_eq!(quote_tab("Client Basics"), "'Client Basics'");
        assert_eq!(quote_tab("Bob's"), "'Bob''s'");
    }

    #[test]
    fn wire_request_becomes_tagged() {
        let wire: RowWriteRequest = serde_json::from_value(json!({
            "sheetId": "s", "tabName": "ClientInfo", "rowData": ["Acme"], "rowIndex": 3
        }))
        .unwrap();
        let (_, _, request) = wire.into_request().unwrap();
        assert_eq!(
            request,
            WriteRequest::UpdateAt {
                index: 3,
                row: cells(&["Acme"])
            }
        );

        let wire: RowWriteRequest = serde_json::from_value(json!({
            "sheetId": "s", "tabName": "Events", "rows": [["a"], ["b"]], "rowIndex": 3
        }))
        .unwrap();
        let (_, _, request) = wire.into_request().unwrap();
        assert_eq!(request, WriteRequest::ReplaceAll(vec![cells(&["a"]), cells(&["b"])]));

        let wire: RowWriteRequest =
            serde_json::from_value(json!({ "sheetId": "s", "tabName": "Events" })).unwrap();
        assert!(matches!(wire.into_request(), Err(WizardError::BadRequest(_))));
    }

    #[test]
    fn wire_request_from_tagged_omits_unused_fields() {
        let wire = RowWriteRequest::new("s", "ClientInfo", &WriteRequest::Append(cells(&["Acme"])));
        assert_eq!(
            serde_json::to_value(&wire).unwrap(),
            json!({ "sheetId": "s", "tabName": "ClientInfo", "rowData": ["Acme"] })
        );
    }

    #[tokio::test]
    async fn append_then_update_in_place() {
        let sheets = workbook();
        let first = sheets
            .write(
                "sheet-1",
                "ClientInfo",
                WriteRequest::Append(cells(&["Acme", "Acme Billing", "Jane Smith"])),
            )
            .await
            .unwrap();
        assert_eq!(first.row_index, Some(0));
        assert_eq!(
            row_index_from_range(first.result["updates"]["updatedRange"].as_str().unwrap()),
            Some(0)
        );

        let second = sheets
            .write(
                "sheet-1",
                "ClientInfo",
                WriteRequest::UpdateAt {
                    index: 0,
                    row: cells(&["Acme Corp", "Acme Billing", "Jane Smith"]),
                },
            )
            .await
            .unwrap();
        assert_eq!(second.row_index, Some(0));
        assert_eq!(
            sheets.data_rows("sheet-1", "ClientInfo").unwrap(),
            vec![cells(&["Acme Corp", "Acme Billing", "Jane Smith"])]
        );
    }

    #[tokio::test]
    async fn replace_all_clears_previous_rows() {
        let sheets = workbook();
        sheets
            .write(
                "sheet-1",
                "Events",
                WriteRequest::ReplaceAll(vec![cells(&["install", "open"]), cells(&["buy", "iap"])]),
            )
            .await
            .unwrap();
        let outcome = sheets
            .write(
                "sheet-1",
                "Events",
                WriteRequest::ReplaceAll(vec![cells(&["signup", "open"])]),
            )
            .await
            .unwrap();

        assert_eq!(outcome.row_index, None);
        assert_eq!(
            sheets.data_rows("sheet-1", "Events").unwrap(),
            vec![cells(&["signup", "open"])]
        );
    }

    #[tokio::test]
    async fn update_past_the_data_region_fails() {
        let sheets = workbook();
        sheets
            .write("sheet-1", "ClientInfo", WriteRequest::Append(cells(&["Acme"])))
            .await
            .unwrap();

        let beyond = sheets
            .write(
                "sheet-1",
                "ClientInfo",
                WriteRequest::UpdateAt {
                    index: 3_000_000,
                    row: cells(&["Far"]),
                },
            )
            .await;
        assert!(matches!(beyond, Err(WizardError::SheetWrite(m)) if m.contains("exceeds grid limits")));

        let overflow = sheets
            .write(
                "sheet-1",
                "ClientInfo",
                WriteRequest::UpdateAt {
                    index: u32::MAX,
                    row: cells(&["Far"]),
                },
            )
            .await;
        assert!(matches!(overflow, Err(WizardError::BadRequest(_))));
        assert_eq!(
            sheets.data_rows("sheet-1", "ClientInfo").unwrap(),
            vec![cells(&["Acme"])]
        );
    }

    #[tokio::test]
    async fn unknown_tab_or_sheet_fails() {
        let sheets = workbook();
        let missing_tab = sheets
            .write("sheet-1", "Nope", WriteRequest::Append(cells(&["x"])))
            .await;
        assert!(matches!(missing_tab, Err(WizardError::SheetWrite(_))));

        let missing_sheet = sheets
            .write("other", "ClientInfo", WriteRequest::Append(cells(&["x"])))
            .await;
        assert!(matches!(missing_sheet, Err(WizardError::SheetWrite(_))));
        assert_eq!(sheets.data_rows("sheet-1", "ClientInfo").unwrap().len(), 0);
    }
}
