//! Startup provisioning of configured users and their default channels.

use crate::CoreError;
use condor_schema::{ChannelName, ChannelSource};
use condor_store::{ChannelRecord, PackageIndex, StoreError, UserRecord};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapUser {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub default_channels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub users: Vec<BootstrapUser>,
}

/// Register users not yet known to the index and create their default
/// channels. Users that are already registered are left untouched.
///
/// Returns the names of the channels created.
pub fn provision_users(
    index: &dyn PackageIndex,
    config: &BootstrapConfig,
) -> Result<Vec<ChannelName>, CoreError> {
    let mut created = Vec::new();
    for user in &config.users {
        if !index.register_user(&UserRecord::new(&user.name, user.role.as_deref()))? {
            continue;
        }
        info!("registered user '{}'", user.name);
        for channel in &user.default_channels {
            created.push(create_default_channel(index, &user.name, channel)?);
        }
    }
    Ok(created)
}

/// Create `preferred`, or `{user}-0`, `{user}-1`, ... if it is taken.
fn create_default_channel(
    index: &dyn PackageIndex,
    user: &str,
    preferred: &str,
) -> Result<ChannelName, CoreError> {
    let mut suffix: Option<u32> = None;
    loop {
        let name = match suffix {
            None => preferred.to_owned(),
            Some(i) => format!("{user}-{i}"),
        };
        let mut record = ChannelRecord::new(&name, ChannelSource::Local);
        record.private = true;
        record.owner = Some(user.to_owned());
        record.description = Some(format!("{user}'s default channel"));
        match index.create_channel(&record) {
            Ok(()) => {
                info!("created default channel '{name}' for '{user}'");
                return Ok(record.name);
            }
            Err(StoreError::ChannelExists(_)) => {
                suffix = Some(suffix.map_or(0, |i| i + 1));
            }
            Err(e) => return Err(e.into()),
        }
    }
}
