use anyhow::Result;
use tracing::debug;
use vmpm_core::{
    is_qualified, parse_qualified, qualify, validate_plugin_name, DefinitionKind, VmpmError,
};

/// Resolves a user-supplied name to `alias:plugin`.
///
/// Qualified names are validated and returned as-is; short names go through
/// [`resolve_short_alias`].
pub fn resolve_name<'s, I, F>(
    name: &str,
    kind: DefinitionKind,
    sources: I,
    contains: F,
) -> Result<String>
where
    I: IntoIterator<Item = &'s str>,
    F: FnMut(&str, &str) -> Result<bool>,
{
    if is_qualified(name) {
        parse_qualified(name)?;
        return Ok(name.to_string());
    }

    resolve_short_alias(name, kind, sources, contains)
}

/// Finds the single tracked source defining `plugin`.
///
/// `contains(alias, plugin)` reports whether the source `alias` defines the
/// plugin. Zero matches is `NotFound`; more than one is `Ambiguous` and lists
/// every matching source.
pub fn resolve_short_alias<'s, I, F>(
    plugin: &str,
    kind: DefinitionKind,
    sources: I,
    mut contains: F,
) -> Result<String>
where
    I: IntoIterator<Item = &'s str>,
    F: FnMut(&str, &str) -> Result<bool>,
{
    validate_plugin_name(plugin)?;

    let mut matches = Vec::new();
    for alias in sources {
        if contains(alias, plugin)? {
            matches.push(alias.to_string());
        }
    }
    debug!(plugin, kind = kind.as_str(), ?matches, "resolved short alias");

    match matches.as_slice() {
        [] => Err(VmpmError::NotFound(format!("{} '{}'", kind.as_str(), plugin)).into()),
        [alias] => Ok(qualify(alias, plugin)),
        _ => Err(VmpmError::Ambiguous {
            name: plugin.to_string(),
            matches,
        }
        .into()),
    }
}
