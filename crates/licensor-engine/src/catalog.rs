//! Read-only lookups into reference data owned elsewhere: the application
//! catalog and the customer directory.
//!
//! The engine consumes only these traits. [`StaticCatalog`] is the in-memory
//! implementation, loadable from the `catalog.yaml` data file:
//!
//! ```yaml
//! applications:
//!   - id: 0e9d8c7b-6a5f-4e3d-8c2b-1a0f9e8d7c6b
//!     name: Payroll Suite
//!     publisher: Contoso
//!     version: "2.1"
//!     active: true
//! customers:
//!   - id: C10000
//!     name: Contoso Ltd.
//!     address: 1 Main St
//!     contact: ops@contoso.example
//! ```

use std::collections::BTreeMap;

use licensor_core::{ApplicationId, LicensingError, LicensingResult};
use serde::{Deserialize, Serialize};

/// Catalog view of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Display name.
    pub name: String,
    /// Publisher.
    #[serde(default)]
    pub publisher: String,
    /// Version string.
    #[serde(default)]
    pub version: String,
    /// Whether new licenses may be issued.
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Directory view of a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    /// Display name.
    pub name: String,
    /// Postal address.
    #[serde(default)]
    pub address: String,
    /// Contact.
    #[serde(default)]
    pub contact: String,
}

/// Application lookup.
pub trait ApplicationCatalog: Send + Sync {
    /// Find an application by id.
    fn lookup(&self, id: &ApplicationId) -> Option<AppInfo>;
}

/// Customer lookup.
pub trait CustomerDirectory: Send + Sync {
    /// Find a customer by id.
    fn lookup(&self, id: &str) -> Option<CustomerInfo>;
}

/// In-memory catalog and customer directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticCatalog {
    applications: BTreeMap<ApplicationId, AppInfo>,
    customers: BTreeMap<String, CustomerInfo>,
}

#[derive(Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    applications: Vec<AppEntry>,
    #[serde(default)]
    customers: Vec<CustomerEntry>,
}

#[derive(Serialize, Deserialize)]
struct AppEntry {
    id: ApplicationId,
    #[serde(flatten)]
    info: AppInfo,
}

#[derive(Serialize, Deserialize)]
struct CustomerEntry {
    id: String,
    #[serde(flatten)]
    info: CustomerInfo,
}

fn default_true() -> bool {
    true
}

impl StaticCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an application.
    pub fn add_application(&mut self, id: ApplicationId, info: AppInfo) -> &mut Self {
        self.applications.insert(id, info);
        self
    }

    /// Add or replace a customer.
    pub fn add_customer(&mut self, id: impl Into<String>, info: CustomerInfo) -> &mut Self {
        self.customers.insert(id.into(), info);
        self
    }

    /// Mark an application active or inactive. Returns false if unknown.
    pub fn set_application_active(&mut self, id: &ApplicationId, active: bool) -> bool {
        match self.applications.get_mut(id) {
            Some(app) => {
                app.active = active;
                true
            }
            None => false,
        }
    }

    /// Parse the YAML catalog format.
    pub fn from_yaml(text: &str) -> LicensingResult<Self> {
        let file: CatalogFile = serde_yaml::from_str(text)
            .map_err(|e| LicensingError::Serialization(format!("catalog: {e}")))?;
        let mut catalog = Self::new();
        for entry in file.applications {
            if catalog.applications.insert(entry.id, entry.info).is_some() {
                return Err(LicensingError::Validation(format!(
                    "catalog lists application {} twice",
                    entry.id
                )));
            }
        }
        for entry in file.customers {
            if catalog.customers.contains_key(&entry.id) {
                return Err(LicensingError::Validation(format!(
                    "catalog lists customer {} twice",
                    entry.id
                )));
            }
            catalog.customers.insert(entry.id, entry.info);
        }
        Ok(catalog)
    }

    /// Render the YAML catalog format.
    pub fn to_yaml(&self) -> LicensingResult<String> {
        let file = CatalogFile {
            applications: self
                .applications
                .iter()
                .map(|(id, info)| AppEntry {
                    id: *id,
                    info: info.clone(),
                })
                .collect(),
            customers: self
                .customers
                .iter()
                .map(|(id, info)| CustomerEntry {
                    id: id.clone(),
                    info: info.clone(),
                })
                .collect(),
        };
        serde_yaml::to_string(&file).map_err(|e| LicensingError::Serialization(e.to_string()))
    }
}

impl ApplicationCatalog for StaticCatalog {
    fn lookup(&self, id: &ApplicationId) -> Option<AppInfo> {
        self.applications.get(id).cloned()
    }
}

impl CustomerDirectory for StaticCatalog {
    fn lookup(&self, id: &str) -> Option<CustomerInfo> {
        self.customers.get(id).cloned()
    }
}
