use anyhow::{Context, Result, bail};
use clap::Args;
use shopdb_core::Provisioner;

use super::{GlobalOpts, connect};

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Print differences as JSON
    #[arg(long)]
    pub json: bool,
}

/// Compare the live deployment against the plan; non-zero exit on drift
pub async fn run(args: VerifyArgs, globals: &GlobalOpts) -> Result<()> {
    let config = globals.load_config()?;
    let spec = config.provision_spec();

    let store = connect(&config).await?;
    let drift = Provisioner::default()
        .verify(&store, &spec)
        .await
        .with_context(|| format!("verifying {}.{}", spec.database, spec.collection.name))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&drift)?);
    } else if drift.is_empty() {
        println!(
            "{}.{} matches the provisioning plan",
            spec.database, spec.collection.name
        );
    } else {
        for item in &drift {
            println!("  {}", item);
        }
    }

    if !drift.is_empty() {
        bail!(
            "{}.{} differs from the provisioning plan in {} place(s)",
            spec.database,
            spec.collection.name,
            drift.len()
        );
    }
    Ok(())
}
