//! Print the validator and index plan without connecting.

use anyhow::Result;
use clap::Args;
use serde_json::{Value, json};
use shopdb_core::ProvisionSpec;
use shopdb_core::bson::Bson;

use super::GlobalOpts;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Print the whole plan as a single JSON document
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: SchemaArgs, globals: &GlobalOpts) -> Result<()> {
    let spec = globals.load_config()?.provision_spec();
    spec.validate()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan_json(&spec))?);
        return Ok(());
    }

    println!("Database:   {}", spec.database);
    println!("Collection: {}", spec.collection.name);
    println!(
        "Validation: action={:?} level={:?}",
        spec.collection.validation_action, spec.collection.validation_level
    );
    println!("Validator:");
    println!("{}", serde_json::to_string_pretty(&validator_json(&spec))?);
    println!("Indexes:");
    for index in &spec.indexes {
        println!("  {:<20} {}", index.name, index);
    }
    Ok(())
}

fn validator_json(spec: &ProvisionSpec) -> Value {
    Bson::Document(spec.collection.schema.to_validator()).into_relaxed_extjson()
}

/// The plan as one JSON document, index options in server spelling
fn plan_json(spec: &ProvisionSpec) -> Value {
    let indexes: Vec<Value> = spec
        .indexes
        .iter()
        .map(|index| {
            let mut entry = json!({
                "name": index.name,
                "key": Bson::Document(index.key_document()).into_relaxed_extjson(),
            });
            if let Some(ttl) = index.expire_after {
                entry["expireAfterSeconds"] = json!(ttl.as_secs());
            }
            for (key, value) in &index.options {
                entry[key.as_str()] = value.clone().into_relaxed_extjson();
            }
            entry
        })
        .collect();

    json!({
        "database": spec.database,
        "collection": spec.collection.name,
        "validationAction": spec.collection.validation_action,
        "validationLevel": spec.collection.validation_level,
        "validator": validator_json(spec),
        "indexes": indexes,
    })
}
