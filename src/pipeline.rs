//! The provisioning run, stage by stage.

use std::io::IsTerminal;

use tracing::{debug, info};

use crate::cache::{DiskTools, HostDiskTools, ImageCache};
use crate::config::{self, ProvisionOpts, ResolvedConfig};
use crate::error::ProvisionError;
use crate::helpers::remote::{HttpSource, RemoteSource};
use crate::helpers::status::{Stage, completed};
use crate::helpers::confirm;
use crate::hypervisor::powershell::PowerShell;
use crate::hypervisor::{self, HyperV, Hypervisor};
use crate::packager::{self, AuthoringTool, IsoAuthoringTool};
use crate::payload::build_payload;
use crate::repositories::Catalog;

/// Resolve options and run the pipeline against the real host.
pub async fn run(opts: ProvisionOpts) -> Result<(), ProvisionError> {
    let catalog = Catalog::builtin()?;
    let id = config::image_identifier(&opts, &catalog)?;
    let image = catalog.resolve(&id)?;
    let cfg = config::resolve(&opts, image)?;

    // Fail before downloading anything if the disc cannot be built.
    let tool = IsoAuthoringTool::discover(cfg.authoring_tool.as_deref())?;
    info!("authoring tool: {}", tool.program().display());

    let shell = PowerShell::new(&cfg.powershell);
    debug!("hyper-v through {}", shell.program());
    let mut source = HttpSource::new(cfg.proxy.as_deref())?;
    if !std::io::stderr().is_terminal() {
        source = source.quiet();
    }
    let cache = ImageCache::new(&cfg.cache_root, source, HostDiskTools::new(shell.clone()));
    let hyperv = HyperV::new(shell);

    execute(&cfg, &cache, &hyperv, &tool, confirm).await
}

/// Cache → payload → cleanup → disc → machine. The first error aborts.
pub async fn execute<S, T, H, F>(
    cfg: &ResolvedConfig,
    cache: &ImageCache<S, T>,
    hv: &H,
    tool: &dyn AuthoringTool,
    confirm: F,
) -> Result<(), ProvisionError>
where
    S: RemoteSource,
    T: DiskTools,
    H: Hypervisor + ?Sized,
    F: FnOnce(&str) -> Result<bool, ProvisionError>,
{
    let name = cfg.machine.name.as_str();
    let lock = cache.lock(&cfg.image)?;
    debug!("holding {}", lock.path().display());

    // The download draws its own progress bar, so this stage reports once done.
    let image = cache.acquire(&cfg.image, &cfg.cache).await?;
    Stage::begin(format!(
        "Image {} {} ({}) ready: {}, {}",
        cfg.image.distribution(),
        cfg.image.version(),
        cfg.image.codename(),
        image.stamp,
        image.protocol
    ))
    .done();

    let stage = Stage::begin("Rendering provisioning payload");
    let payload = build_payload(
        &cfg.payload,
        &cfg.network,
        image.protocol,
        cfg.user_data_template.as_deref(),
    )?;
    stage.done();

    if hypervisor::cleanup_existing(hv, name, cfg.force, confirm)? {
        Stage::begin(format!("Removed previous machine {name}")).done();
    }

    let stage = Stage::begin("Packaging provisioning disc");
    let disc = packager::package(&payload, image.protocol, tool, &cfg.machine.provisioning_disc_path())?;
    stage.note(disc.display().to_string());
    stage.done();

    let stage = Stage::begin(format!("Creating machine {name}"));
    hypervisor::provision(hv, &cfg.machine, &image.path)?;
    stage.done();

    completed(&format!("{name} is booting"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeDiskTools;
    use crate::helpers::command::ToolFailure;
    use crate::hypervisor::fake::FakeHypervisor;
    use crate::packager::DiscConvention;
    use clap::Parser;
    use sha2::{Digest, Sha256};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CopyTool;

    impl AuthoringTool for CopyTool {
        fn author(&self, source_dir: &Path, output: &Path, _: DiscConvention) -> Result<(), ToolFailure> {
            let user_data = fs::read_to_string(source_dir.join("user-data")).unwrap();
            fs::write(output, user_data).unwrap();
            Ok(())
        }
    }

    const STEM: &str = "ubuntu-22.04-server-cloudimg-amd64";
    const BODY: &[u8] = b"raw image bytes";

    async fn mirror(server: &MockServer, downloads: u64) {
        Mock::given(method("HEAD"))
            .and(path(format!("/{STEM}.manifest")))
            .respond_with(ResponseTemplate::new(200).insert_header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT"))
            .mount(server)
            .await;
        Mock::given(method("HEAD"))
            .and(path(format!("/{STEM}.img")))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/{STEM}.img")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .expect(downloads)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/SHA256SUMS"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("{} *{STEM}.img\n", hex::encode(Sha256::digest(BODY)))),
            )
            .expect(downloads)
            .mount(server)
            .await;
    }

    fn config(server: &MockServer, root: &Path, extra: &[&str]) -> ResolvedConfig {
        let vm_dir = root.join("vms").to_string_lossy().into_owned();
        let cache_dir = root.join("cache").to_string_lossy().into_owned();
        let mut args = vec![
            "cloud-vm-provisioner",
            "--image-version",
            "22.04-generic",
            "--name",
            "web01",
            "--ssh-key",
            "ssh-ed25519 AAAA me",
            "--vm-dir",
            vm_dir.as_str(),
            "--cache-dir",
            cache_dir.as_str(),
        ];
        args.extend_from_slice(extra);
        let opts = ProvisionOpts::try_parse_from(args).unwrap();

        let base = reqwest::Url::parse(&format!("{}/", server.uri())).unwrap();
        let image = Catalog::builtin().unwrap().resolve("22.04-generic").unwrap().with_url_root(base);
        config::resolve(&opts, image).unwrap()
    }

    #[tokio::test]
    async fn full_run_then_rerun_from_cache() {
        let server = MockServer::start().await;
        mirror(&server, 1).await;
        let root = tempfile::tempdir().unwrap();
        let cfg = config(&server, root.path(), &[]);

        let tools = FakeDiskTools::default();
        let cache = ImageCache::new(&cfg.cache_root, HttpSource::new(None).unwrap().quiet(), tools.clone());

        let hv = FakeHypervisor::default();
        execute(&cfg, &cache, &hv, &CopyTool, |_| panic!("no machine to replace")).await.unwrap();

        let disc = cfg.machine.provisioning_disc_path();
        assert!(fs::read_to_string(&disc).unwrap().starts_with("#cloud-config\n"));
        let calls = hv.calls();
        assert!(calls[0].starts_with("disk "), "{calls:?}");
        assert!(calls[0].contains(&format!("{STEM}-20240101000000.vhd")));
        assert_eq!(calls.last().unwrap(), "start web01");

        // second run: the old machine is replaced, nothing is downloaded again
        let hv = FakeHypervisor::with_existing("web01", vec![cfg.machine.disk_path.clone()]);
        let forced = config(&server, root.path(), &["--force"]);
        execute(&forced, &cache, &hv, &CopyTool, |_| panic!("--force must not prompt"))
            .await
            .unwrap();

        let calls = hv.calls();
        assert_eq!(calls[..3], ["stop web01", "disks web01", "remove web01"]);
        assert_eq!(calls.last().unwrap(), "start web01");
        assert_eq!(tools.calls.native.load(Ordering::SeqCst), 1);
        assert_eq!(tools.calls.extract.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn declining_replacement_stops_before_the_disc_is_built() {
        let server = MockServer::start().await;
        mirror(&server, 1).await;
        let root = tempfile::tempdir().unwrap();
        let cfg = config(&server, root.path(), &[]);
        let cache = ImageCache::new(
            &cfg.cache_root,
            HttpSource::new(None).unwrap().quiet(),
            FakeDiskTools::default(),
        );

        let hv = FakeHypervisor::with_existing("web01", vec![]);
        let err = execute(&cfg, &cache, &hv, &CopyTool, |_| Ok(false)).await.unwrap_err();

        assert!(matches!(err, ProvisionError::InvalidInput(_)));
        assert!(!cfg.machine.provisioning_disc_path().exists());
        assert!(hv.calls().is_empty());
    }
}
