use crate::cli::SchemaArgs;
use crate::config::Config;
use schemars::schema_for;

/// Print the JSON Schema of `ralphex.yaml`, or a config file with every
/// default filled in.
pub fn execute(args: SchemaArgs) -> anyhow::Result<()> {
    let rendered = if args.defaults {
        serde_yaml::to_string(&Config::default())?
    } else {
        serde_json::to_string_pretty(&schema_for!(Config))?
    };
    println!("{}", rendered.trim_end());
    Ok(())
}
