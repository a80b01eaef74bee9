//! `rag profiles`: configured profiles and the health of their indexes.

use anyhow::Result;

use crate::config::Config;
use crate::index::{self, IndexStatus};

/// One row of the profiles table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileStatus {
    pub name: String,
    pub active: bool,
    pub docs_dir_exists: bool,
    pub index: IndexStatus,
}

impl ProfileStatus {
    pub fn chunks(&self) -> Option<usize> {
        match self.index {
            IndexStatus::Ok { rows } => Some(rows),
            _ => None,
        }
    }
}

/// Inspect every configured profile. `active` is the profile selected for
/// this invocation.
pub fn profile_statuses(config: &Config, active: &str) -> Result<Vec<ProfileStatus>> {
    config
        .profile_names()
        .into_iter()
        .map(|name| {
            let profile = config.resolve_profile(Some(&name))?;
            Ok(ProfileStatus {
                active: name == active,
                docs_dir_exists: profile.docs_dir.is_dir(),
                index: index::status(&profile.index_dir, config.embedding.dims),
                name,
            })
        })
        .collect()
}

pub fn list_profiles(config: &Config, active: &str) -> Result<()> {
    let statuses = profile_statuses(config, active)?;

    println!(
        "{:<2}{:<16} {:<10} {:<10} CHUNKS",
        "", "PROFILE", "DOCS", "INDEX"
    );
    for s in &statuses {
        let index_label = match &s.index {
            IndexStatus::Ok { .. } => "ok",
            IndexStatus::Missing => "missing",
            IndexStatus::Corrupt(_) => "corrupt",
        };
        println!(
            "{:<2}{:<16} {:<10} {:<10} {}",
            if s.active { "*" } else { "" },
            s.name,
            if s.docs_dir_exists { "ok" } else { "missing" },
            index_label,
            s.chunks().map(|n| n.to_string()).unwrap_or_else(|| "-".to_string())
        );
    }

    for s in &statuses {
        if let IndexStatus::Corrupt(reason) = &s.index {
            eprintln!("warning: profile '{}' index is corrupt: {}", s.name, reason);
        }
    }

    Ok(())
}
