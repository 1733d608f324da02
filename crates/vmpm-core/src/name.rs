use anyhow::Result;

use crate::VmpmError;

const QUALIFIED_NAME_DELIMITER: char = ':';
const ALIAS_DELIMITER: char = '/';

pub fn is_qualified(name: &str) -> bool {
    name.contains(QUALIFIED_NAME_DELIMITER)
}

/// Splits `organization/repository:plugin` on the first `:`.
pub fn parse_qualified(name: &str) -> Result<(&str, &str)> {
    let Some((alias, plugin)) = name.split_once(QUALIFIED_NAME_DELIMITER) else {
        return Err(VmpmError::InvalidName {
            name: name.to_string(),
            reason: format!("expected <organization>/<repository>{QUALIFIED_NAME_DELIMITER}<plugin>"),
        }
        .into());
    };
    validate_alias(alias)?;
    validate_plugin_name(plugin)?;
    Ok((alias, plugin))
}

pub fn parse_alias(alias: &str) -> Result<(&str, &str)> {
    match alias.split_once(ALIAS_DELIMITER) {
        Some((organization, repository))
            if !organization.is_empty()
                && !repository.is_empty()
                && !repository.contains(ALIAS_DELIMITER)
                && !alias.contains(QUALIFIED_NAME_DELIMITER) =>
        {
            Ok((organization, repository))
        }
        _ => Err(VmpmError::InvalidAlias(alias.to_string()).into()),
    }
}

pub fn validate_alias(alias: &str) -> Result<()> {
    parse_alias(alias).map(|_| ())
}

pub fn qualify(alias: &str, plugin: &str) -> String {
    format!("{alias}{QUALIFIED_NAME_DELIMITER}{plugin}")
}

/// Plugin names become file names inside a source mirror.
pub fn validate_plugin_name(plugin: &str) -> Result<()> {
    let reason = if plugin.is_empty() {
        "plugin name must not be empty"
    } else if plugin.contains(['/', '\\']) || plugin == "." || plugin == ".." {
        "plugin name must not contain path separators"
    } else {
        return Ok(());
    };
    Err(VmpmError::InvalidName {
        name: plugin.to_string(),
        reason: reason.to_string(),
    }
    .into())
}
