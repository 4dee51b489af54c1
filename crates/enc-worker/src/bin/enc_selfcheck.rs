use std::path::Path;

use enc_media::{check_ffmpeg, check_ffprobe, version};
use enc_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "enc-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_tool("ffmpeg", check_ffmpeg(&config.ffmpeg_path)).await?;
    ensure_tool("ffprobe", check_ffprobe(&config.ffprobe_path)).await?;
    ensure_env_present(&["REDIS_URL"])?;

    println!("enc-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;

    let probe = path.join(".enc-selfcheck");
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("work dir {} not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

async fn ensure_tool(
    name: &str,
    found: enc_media::MediaResult<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let path = found.map_err(|e| anyhow::anyhow!("{} not available: {}", name, e))?;
    let version = version(&path).await?;
    println!("enc-selfcheck: {} {}", path.display(), version);
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
