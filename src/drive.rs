//! Drive-side collaborators: copying the template spreadsheet and storing
//! uploaded images in the client's folder.

use async_trait::async_trait;
use lazy_static::lazy_static;
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::error::{Result, WizardError};
use crate::sheets::MemorySheets;

lazy_static! {
    static ref BARE_FOLDER_ID_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9_-]{25,}$").unwrap();
    static ref FOLDER_URL_REGEX: Regex = Regex::new(r"/folders/([a-zA-Z0-9_-]+)").unwrap();
}

/// Copies the template spreadsheet for a new client
#[async_trait]
pub trait TemplateProvisioner: Send + Sync {
    /// Returns the id of the new spreadsheet.
    async fn provision(&self, output_name: &str, folder_id: &str) -> Result<String>;
}

/// Stores and removes files in a Drive folder
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn upload(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile>;

    async fn delete(&self, file_id: &str) -> Result<()>;
}

/// Metadata of an uploaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub thumbnail_link: Option<String>,
}

/// Extracts a Drive folder id from a pasted folder URL or a bare id.
///
/// ```
/// use flourish_wizard::drive::folder_id_from_url;
///
/// let url = "https://drive.google.com/drive/folders/1AbC_dEf-GhI?usp=sharing";
/// assert_eq!(folder_id_from_url(url).as_deref(), Some("1AbC_dEf-GhI"));
/// assert_eq!(folder_id_from_url("/path/to/folder"), None);
/// ```
pub fn folder_id_from_url(url: &str) -> Option<String> {
    let url = url.trim();
    if BARE_FOLDER_ID_REGEX.is_match(url) {
        return Some(url.to_string());
    }
    FOLDER_URL_REGEX
        .captures(url)
        .map(|caps| caps[1].to_string())
}

#[derive(Debug, Clone)]
struct StoredFile {
    name: String,
    folder_id: String,
    bytes: usize,
}

/// Drive stand-in backed by [`MemorySheets`]: provisioning creates a new
/// workbook holding the template's tabs and header rows.
pub struct MemoryDrive {
    sheets: Arc<MemorySheets>,
    template: Vec<(&'static str, Vec<&'static str>)>,
    files: Mutex<HashMap<String, StoredFile>>,
}

impl MemoryDrive {
    pub fn new(sheets: Arc<MemorySheets>, template: Vec<(&'static str, Vec<&'static str>)>) -> Self {
        Self {
            sheets,
            template,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a file with this id is currently stored
    pub fn has_file(&self, file_id: &str) -> bool {
        self.lock().contains_key(file_id)
    }

    /// Names of the files stored directly under `folder_id`
    pub fn names_in(&self, folder_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .values()
            .filter(|f| f.folder_id == folder_id)
            .map(|f| f.name.clone())
            .collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredFile>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TemplateProvisioner for MemoryDrive {
    async fn provision(&self, output_name: &str, folder_id: &str) -> Result<String> {
        let sheet_id = {
            let mut files = self.lock();
            if files
                .values()
                .any(|f| f.folder_id == folder_id && f.name == output_name)
            {
                return Err(WizardError::DuplicateName {
                    name: output_name.to_string(),
                });
            }
            let sheet_id = Uuid::new_v4().simple().to_string();
            files.insert(
                sheet_id.clone(),
                StoredFile {
                    name: output_name.to_string(),
                    folder_id: folder_id.to_string(),
                    bytes: 0,
                },
            );
            sheet_id
        };
        let tabs: Vec<(&str, Vec<&str>)> = self.template.clone();
        self.sheets.create(&sheet_id, &tabs);
        info!("provisioned '{}' as {} in memory", output_name, sheet_id);
        Ok(sheet_id)
    }
}

#[async_trait]
impl FileStore for MemoryDrive {
    async fn upload(
        &self,
        folder_id: &str,
        name: &str,
        _mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile> {
        let id = Uuid::new_v4().simple().to_string();
        self.lock().insert(
            id.clone(),
            StoredFile {
                name: name.to_string(),
                folder_id: folder_id.to_string(),
                bytes: bytes.len(),
            },
        );
        Ok(UploadedFile {
            web_view_link: Some(format!("memory://files/{}", id)),
            thumbnail_link: None,
            name: name.to_string(),
            id,
        })
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        match self.lock().remove(file_id) {
            Some(file) => {
                info!("deleted {} ({} bytes) from memory drive", file.name, file.bytes);
                Ok(())
            }
            None => Err(WizardError::Drive(format!("File not found: {}", file_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive() -> (Arc<MemorySheets>, MemoryDrive) {
        let sheets = Arc::new(MemorySheets::new());
        let drive = MemoryDrive::new(sheets.clone(), vec![("ClientInfo", vec!["clientName"])]);
        (sheets, drive)
    }

    #[test]
    fn folder_ids() {
        assert_eq!(
            folder_id_from_url("https://drive.google.com/drive/u/0/folders/abc123_-X").as_deref(),
            Some("abc123_-X")
        );
        let bare = "1vaW7egSNhsLoWVvG2VpqnUwdd_shiZ6";
        assert_eq!(folder_id_from_url(bare).as_deref(), Some(bare));
        assert_eq!(folder_id_from_url("short-id"), None);
        assert_eq!(folder_id_from_url(""), None);
    }

    #[tokio::test]
    async fn provision_creates_template_copy() {
        let (sheets, drive) = drive();
        let sheet_id = drive.provision("Acme_2024", "folder-1").await.unwrap();
        assert!(sheets.contains(&sheet_id));
        assert_eq!(sheets.data_rows(&sheet_id, "ClientInfo"), Some(Vec::new()));
        assert_eq!(drive.names_in("folder-1"), vec!["Acme_2024".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected_per_folder() {
        let (_, drive) = drive();
        drive.provision("Acme_2024", "folder-1").await.unwrap();

        let again = drive.provision("Acme_2024", "folder-1").await;
        assert!(matches!(again, Err(WizardError::DuplicateName { name }) if name == "Acme_2024"));

        assert!(drive.provision("Acme_2024", "folder-2").await.is_ok());
    }

    #[tokio::test]
    async fn upload_and_delete() {
        let (_, drive) = drive();
        let file = drive
            .upload("folder-1", "banner.png", "image/png", vec![1, 2, 3])
            .await
            .unwrap();
        assert!(drive.has_file(&file.id));
        assert_eq!(file.name, "banner.png");

        drive.delete(&file.id).await.unwrap();
        assert!(!drive.has_file(&file.id));
        assert!(matches!(drive.delete(&file.id).await, Err(WizardError::Drive(_))));
    }
}
