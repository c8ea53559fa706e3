use clap::Args;

#[derive(Args, Debug)]
pub struct UpArgs {}

pub async fn execute(_args: UpArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let provisioner = global.create_provisioner()?;

    if let Err(e) = provisioner.up().await {
        eprintln!("Error bringing den up: {}", e);
        anyhow::bail!("up failed");
    }
    println!("den is up");
    Ok(())
}
