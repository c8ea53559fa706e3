use clap::Args;

#[derive(Args, Debug)]
pub struct DownArgs {}

pub async fn execute(_args: DownArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let provisioner = global.create_provisioner()?;

    if let Err(e) = provisioner.down().await {
        eprintln!("Error tearing den down: {}", e);
        anyhow::bail!("down failed");
    }
    println!("den is down");
    Ok(())
}
