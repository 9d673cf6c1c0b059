//! Configuration validation.

use std::collections::HashSet;

use super::{Config, ConnectionConfig, OutputMode};
use crate::core::catalog::DriverCatalog;
use crate::error::{ConvertError, Result};

/// Validate the configuration.
pub fn validate(config: &Config, catalog: &DriverCatalog) -> Result<()> {
    validate_connection("source", &config.source, catalog)?;
    validate_connection("target", &config.target, catalog)?;

    if same_database(&config.source, &config.target, catalog) {
        return Err(ConvertError::Config(
            "Source and target must not be the same database".into(),
        ));
    }

    let conv = &config.conversion;
    if conv.batch_size == 0 {
        return Err(ConvertError::Config(
            "conversion.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = conv.workers {
        return Err(ConvertError::Config(
            "conversion.workers must be at least 1".into(),
        ));
    }

    if conv.output.mode == OutputMode::File && conv.output.path.is_none() {
        return Err(ConvertError::Config(
            "conversion.output.path is required for file output".into(),
        ));
    }

    if !conv.execute_on_target && !conv.output.is_enabled() {
        return Err(ConvertError::Config(
            "Nothing to do: execute_on_target is false and no output destination is set".into(),
        ));
    }

    let mut owners = HashSet::new();
    for entry in &conv.schema_mapping {
        if entry.source.is_empty() || entry.target.is_empty() {
            return Err(ConvertError::Config(
                "conversion.schema_mapping entries need both source and target".into(),
            ));
        }
        if !owners.insert(entry.source.to_lowercase()) {
            return Err(ConvertError::Config(format!(
                "conversion.schema_mapping maps source owner '{}' more than once",
                entry.source
            )));
        }
    }
    if !conv.schema_mapping.is_empty() {
        let dialect = catalog.dialect_for(&config.target)?;
        if !dialect.supports_owners() {
            return Err(ConvertError::Config(format!(
                "conversion.schema_mapping is not supported for {} targets",
                dialect.name()
            )));
        }
    }

    Ok(())
}

fn validate_connection(side: &str, conn: &ConnectionConfig, catalog: &DriverCatalog) -> Result<()> {
    let engine = catalog.normalize(&conn.engine).ok_or_else(|| {
        ConvertError::Config(format!(
            "{}.engine '{}' is not supported. Supported engines: {}",
            side,
            conn.engine,
            catalog.engines().join(", ")
        ))
    })?;

    if engine == "sqlite" {
        if conn.path.is_none() {
            return Err(ConvertError::Config(format!("{}.path is required for sqlite", side)));
        }
        return Ok(());
    }

    if conn.host.is_empty() {
        return Err(ConvertError::Config(format!("{}.host is required", side)));
    }
    if conn.database.is_empty() {
        return Err(ConvertError::Config(format!("{}.database is required", side)));
    }
    if conn.user.is_empty() && !conn.integrated_auth {
        return Err(ConvertError::Config(format!(
            "{}.user is required unless integrated_auth is set",
            side
        )));
    }
    Ok(())
}

fn same_database(a: &ConnectionConfig, b: &ConnectionConfig, catalog: &DriverCatalog) -> bool {
    let (Some(ea), Some(eb)) = (catalog.normalize(&a.engine), catalog.normalize(&b.engine)) else {
        return false;
    };
    if ea != eb {
        return false;
    }
    if a.path.is_some() || b.path.is_some() {
        return a.path == b.path;
    }
    a.host.eq_ignore_ascii_case(&b.host) && a.port == b.port && a.database == b.database
}
