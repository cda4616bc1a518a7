use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use bundlefs::cadapter::client::{ObjectBackend, ObjectClient};
use bundlefs::cadapter::localfs::LocalFsBackend;
use bundlefs::cadapter::s3::{S3Backend, S3Config};
use bundlefs::cadapter::store::{BundleStore, StoreConfig};
use bundlefs::fuse::FuseAdapter;
use bundlefs::fuse::mount::mount_unprivileged;
use bundlefs::vfs::config::{DEFAULT_LISTING_TTL, DEFAULT_SIZE_CACHE_CAPACITY};
use bundlefs::vfs::{BundleFs, VfsConfig};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bundlefs")]
#[command(about = "Mount a flat object store as a FUSE filesystem", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Serve objects stored as files in a local directory")]
    Local {
        /// Backend data directory, created if missing
        #[arg(long, value_name = "DIR")]
        data_dir: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
    #[command(about = "Serve objects from an S3-compatible bucket")]
    S3 {
        #[arg(long)]
        bucket: String,
        #[arg(long, value_name = "URL")]
        endpoint: String,
        #[arg(long, default_value = "us-east-1")]
        region: String,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Empty directory to mount on
    #[arg(long, value_name = "DIR")]
    mount_point: PathBuf,
    /// Where objects are materialized while open
    #[arg(long, value_name = "DIR", env = "BUNDLEFS_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_LISTING_TTL.as_secs())]
    listing_ttl_secs: u64,
    #[arg(long, default_value_t = DEFAULT_SIZE_CACHE_CAPACITY)]
    size_cache_capacity: NonZeroUsize,
    #[arg(long, default_value_t = 30)]
    store_timeout_secs: u64,
}

impl CommonArgs {
    fn store_config(&self) -> StoreConfig {
        let mut config = StoreConfig {
            timeout: Duration::from_secs(self.store_timeout_secs),
            ..Default::default()
        };
        if let Some(dir) = &self.scratch_dir {
            config.scratch_dir = dir.clone();
        }
        config
    }

    fn vfs_config(&self) -> VfsConfig {
        VfsConfig {
            listing_ttl: Duration::from_secs(self.listing_ttl_secs),
            size_cache_capacity: self.size_cache_capacity,
            statfs_path: None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Local { data_dir, common } => {
            std::fs::create_dir_all(&data_dir)
                .with_context(|| format!("create data dir {}", data_dir.display()))?;
            info!(data_dir = %data_dir.display(), "using local backend");
            serve(LocalFsBackend::new(&data_dir), &common).await
        }
        Commands::S3 {
            bucket,
            endpoint,
            region,
            common,
        } => {
            let config = S3Config {
                bucket,
                endpoint,
                region,
                ..Default::default()
            };
            info!(bucket = %config.bucket, endpoint = %config.endpoint, "using s3 backend");
            let backend = S3Backend::new(config)
                .await
                .map_err(|e| anyhow::anyhow!("init s3 backend: {e}"))?;
            serve(backend, &common).await
        }
    }
}

async fn serve<B: ObjectBackend + 'static>(backend: B, common: &CommonArgs) -> anyhow::Result<()> {
    let store_config = common.store_config();
    std::fs::create_dir_all(&store_config.scratch_dir).with_context(|| {
        format!(
            "create scratch dir {}",
            store_config.scratch_dir.display()
        )
    })?;
    ensure_mount_point(&common.mount_point)?;

    let store = BundleStore::new(ObjectClient::new(backend), store_config);
    let fs = BundleFs::new(store, common.vfs_config());

    let handle = mount_unprivileged(FuseAdapter::new(fs), &common.mount_point)
        .await
        .with_context(|| {
            format!(
                "mount {} (is fusermount3 available?)",
                common.mount_point.display()
            )
        })?;
    info!(mount_point = %common.mount_point.display(), "mounted; press Ctrl+C to unmount");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "signal error");
    }

    info!("unmounting");
    handle.unmount().await.context("unmount")?;
    Ok(())
}

fn ensure_mount_point(path: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("create mount point {}", path.display()))
}
