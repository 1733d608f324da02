mod definition;
mod error;
mod name;

pub use definition::{ChainDefinition, Definition, DefinitionKind, PluginDescriptor, VmDefinition};
pub use error::VmpmError;
pub use name::{
    is_qualified, parse_alias, parse_qualified, qualify, validate_alias, validate_plugin_name,
};
