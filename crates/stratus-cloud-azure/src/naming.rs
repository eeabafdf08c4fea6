//! Resource names derived from the compute name

use crate::error::{AzureError, Result};

const STORAGE_ACCOUNT_MIN: usize = 3;
const STORAGE_ACCOUNT_MAX: usize = 24;

/// Names of every resource the workflow creates for one VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub group: String,
    pub availability_set: String,
    pub storage_account: String,
    pub network: String,
    pub subnet: String,
    pub public_ip: String,
    pub security_group: String,
    pub nic: String,
}

impl ResourceNames {
    pub fn for_compute(name: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(AzureError::InvalidResourceName {
                name: name.to_string(),
                reason: "name is empty".to_string(),
            });
        }
        Ok(Self {
            group: format!("{}-rg", name),
            availability_set: format!("{}-as", name),
            storage_account: storage_account_name(name)?,
            network: format!("{}-vnet", name),
            subnet: format!("{}-subnet", name),
            public_ip: format!("{}-pip", name),
            security_group: format!("{}-nsg", name),
            nic: format!("{}-nic", name),
        })
    }
}

/// Storage account names are 3-24 lowercase letters and digits
pub fn storage_account_name(name: &str) -> Result<String> {
    let mut sanitized: String = name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    sanitized.truncate(STORAGE_ACCOUNT_MAX - 2);
    sanitized.push_str("sa");

    if sanitized.len() < STORAGE_ACCOUNT_MIN {
        return Err(AzureError::InvalidResourceName {
            name: name.to_string(),
            reason: "no letters or digits to build a storage account name".to_string(),
        });
    }
    Ok(sanitized)
}
