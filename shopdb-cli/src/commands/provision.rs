//! Apply the provisioning plan to the configured deployment.

use anyhow::Result;
use clap::Args;
use shopdb_core::{ProvisionError, ProvisionOptions, ProvisionSpec, Provisioner};

use super::{GlobalOpts, connect};

#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Fail if the collection already exists instead of reusing it
    #[arg(long)]
    pub strict: bool,

    /// Report what would be created without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ProvisionArgs, globals: &GlobalOpts) -> Result<()> {
    let config = globals.load_config()?;
    let spec = config.provision_spec();
    let options = ProvisionOptions {
        strict: args.strict || config.provision.strict,
        dry_run: args.dry_run,
    };

    let store = connect(&config).await?;
    let report = Provisioner::new(options)
        .provision(&store, &spec)
        .await
        .map_err(|err| {
            let context = failure_context(&spec, &err);
            anyhow::Error::new(err).context(context)
        })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

/// What was being provisioned, plus the config escape for index conflicts
fn failure_context(spec: &ProvisionSpec, err: &ProvisionError) -> String {
    let target = format!("provisioning {}.{}", spec.database, spec.collection.name);
    match err {
        ProvisionError::IndexConflict { name, .. } => format!(
            "{target}: index {name} clashes with an existing index; drop one of them, \
             or list {name} under provision.skip_indexes in the config file"
        ),
        _ => target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_context_points_at_skip_indexes() {
        let err = ProvisionError::IndexConflict {
            collection: "events".into(),
            name: "timestamp_1_ttl".into(),
            existing: "{ timestamp: 1 } named timestamp_1".into(),
            requested: "{ timestamp: 1 } expireAfterSeconds=31536000".into(),
        };

        let context = failure_context(&ProvisionSpec::events(), &err);

        assert!(context.starts_with("provisioning online_store.events"));
        assert!(context.contains("list timestamp_1_ttl under provision.skip_indexes"));
    }

    #[test]
    fn test_other_errors_name_the_target_only() {
        let err = ProvisionError::Connection("refused".into());
        assert_eq!(
            failure_context(&ProvisionSpec::events(), &err),
            "provisioning online_store.events"
        );
    }
}
