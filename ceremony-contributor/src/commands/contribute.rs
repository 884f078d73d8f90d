use crate::transfer::Transport;

use ceremony_shared::{
    attestation::AttestationRecord,
    catalog::{Catalog, CircuitIdentity, Family, FamilySelection},
    chain::{ensure_coverage, ChainLink, LinkFiles},
    naming::{derive_output_name, resolve_circuit},
    setup_binary::SetupBinary,
    structures::{ExchangeManifest, FamilyGrants},
    utils::remove_file_if_exists,
    CeremonyError,
};

use futures::{stream, StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_TRANSFER_CONCURRENCY: usize = 4;

const DOWNLOADS_DIRECTORY: &str = "downloads";
const CONTRIBUTIONS_DIRECTORY: &str = "contributions";
const RETAINED_DIRECTORY: &str = "retained";

/// The outcome of a completed round.
#[derive(Clone, Debug)]
pub struct RoundReport {
    pub link: ChainLink,
    /// Every circuit's contribution hash, in processing order.
    pub attestation: AttestationRecord,
    /// `{family}/{file}` of every uploaded object, attestation logs included.
    pub uploaded: BTreeSet<String>,
    /// The local round log and the digest written next to it.
    pub log: PathBuf,
    pub digest: String,
}

/// One file of a family to process.
struct Task {
    input: String,
    circuit: CircuitIdentity,
    output: String,
    upload: Url,
}

///
/// Runs a contributor's round: every circuit of the selected families is
/// downloaded, contributed to and uploaded, in manifest order.
///
/// The round is all or nothing. Any failure aborts it, leaving the working
/// directory to be deleted before a fresh attempt.
///
pub struct Executor {
    setup: Arc<dyn SetupBinary>,
    transport: Transport,
    workdir: PathBuf,
    concurrency: usize,
    progress: bool,
}

impl Executor {
    pub fn new<P: Into<PathBuf>>(setup: Arc<dyn SetupBinary>, transport: Transport, workdir: P) -> Self {
        Self {
            setup,
            transport,
            workdir: workdir.into(),
            concurrency: DEFAULT_TRANSFER_CONCURRENCY,
            progress: false,
        }
    }

    /// Bounds the number of concurrent downloads within a family.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Draws a progress bar on the terminal.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    #[inline]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Returns the directory holding a family's contributed files.
    pub fn output_directory(&self, manifest: &ExchangeManifest, family: Family) -> PathBuf {
        self.workdir
            .join(CONTRIBUTIONS_DIRECTORY)
            .join(manifest.contribution_id.to_string())
            .join(family.as_str())
    }

    /// Returns the directory the predecessor's files of a family are kept in after the round.
    pub fn retained_directory(&self, manifest: &ExchangeManifest, family: Family) -> PathBuf {
        self.workdir
            .join(RETAINED_DIRECTORY)
            .join(manifest.previous_contribution.to_string())
            .join(family.as_str())
    }

    pub async fn execute_round(
        &self,
        manifest: &ExchangeManifest,
        selection: &FamilySelection,
    ) -> Result<RoundReport, CeremonyError> {
        let now = Instant::now();
        let catalog = Catalog::standard().subset(selection);

        if let Some(expires_at) = manifest.expires_at {
            if OffsetDateTime::now_utc() > expires_at {
                return Err(CeremonyError::CapabilityExpired(manifest.contribution_id.to_string()));
            }
        }
        let mut link = ChainLink::start(&manifest.previous_contribution, &manifest.contributor)?;
        if link.id() != &manifest.contribution_id {
            return Err(CeremonyError::MalformedPredecessorId(format!(
                "{} does not follow {}",
                manifest.contribution_id, manifest.previous_contribution
            )));
        }

        // Check the whole manifest before any transfer starts.
        for family in selection.families() {
            match manifest.family(*family) {
                Some(grants) if !grants.download.is_empty() => {}
                _ => return Err(CeremonyError::EmptyRound(family.to_string())),
            }
        }
        let mut plan = Vec::with_capacity(selection.families().len());
        for grants in manifest.select(selection) {
            plan.push((grants, self.plan_family(manifest, grants, &catalog)?));
        }
        let skipped: Vec<&str> = manifest
            .families
            .iter()
            .filter(|grants| !selection.contains(grants.family))
            .map(|grants| grants.family.as_str())
            .collect();
        if !skipped.is_empty() {
            info!("Leaving {} untouched", skipped.join(", "));
        }

        let total: usize = plan.iter().map(|(_, tasks)| tasks.len()).sum();
        let progress = self.progress_bar(total as u64);
        info!(
            "Contributing {} on top of {} ({} circuits)",
            manifest.contribution_id, manifest.previous_contribution, total
        );

        let mut attestation = AttestationRecord::new();
        let mut uploaded = BTreeSet::new();

        for (grants, tasks) in plan {
            let family = grants.family;
            let record = self
                .execute_family(manifest, grants, tasks, &mut link, &mut uploaded, &progress)
                .await?;
            attestation.extend(&record);
            info!("Finished {} ({} circuits)", family, record.len());
        }
        progress.finish_with_message("contribution complete");

        link.ensure_complete(&catalog)?;

        let log = self.workdir.join(manifest.attestation_file_name());
        let digest = attestation.store(&log)?;
        info!(
            "Contributed {} in {:?}, round log digest {}",
            manifest.contribution_id,
            now.elapsed(),
            digest
        );

        Ok(RoundReport {
            link,
            attestation,
            uploaded,
            log,
            digest,
        })
    }

    /// Resolves every download of a family to its circuit, output name and upload grant,
    /// failing unless the downloads cover every circuit of the family.
    fn plan_family(
        &self,
        manifest: &ExchangeManifest,
        grants: &FamilyGrants,
        catalog: &Catalog,
    ) -> Result<Vec<Task>, CeremonyError> {
        let sequence = manifest.contribution_id.sequence();
        let mut tasks = Vec::with_capacity(grants.download.len());

        for input in grants.download.keys() {
            let circuit = resolve_circuit(input, catalog, Some(grants.family))?;
            let output = derive_output_name(input, &manifest.contributor, sequence)?;
            let upload = grants
                .upload
                .get(&output)
                .cloned()
                .ok_or_else(|| CeremonyError::MissingUploadGrant(format!("{}/{}", grants.family, output)))?;
            tasks.push(Task {
                input: input.clone(),
                circuit,
                output,
                upload,
            });
        }

        let attestation = manifest.attestation_file_name();
        if !grants.upload.contains_key(&attestation) {
            return Err(CeremonyError::MissingUploadGrant(format!("{}/{}", grants.family, attestation)));
        }

        // A family is contributed in full or not at all.
        ensure_coverage(
            &manifest.contribution_id,
            &catalog.subset(&FamilySelection::only(grants.family)),
            tasks.iter().map(|task| &task.circuit),
        )?;
        Ok(tasks)
    }

    async fn execute_family(
        &self,
        manifest: &ExchangeManifest,
        grants: &FamilyGrants,
        tasks: Vec<Task>,
        link: &mut ChainLink,
        uploaded: &mut BTreeSet<String>,
        progress: &ProgressBar,
    ) -> Result<AttestationRecord, CeremonyError> {
        let family = grants.family;
        let downloads = self.workdir.join(DOWNLOADS_DIRECTORY).join(family.as_str());
        let outputs = self.output_directory(manifest, family);
        if downloads.exists() {
            warn!("Clearing stale downloads in {}", downloads.display());
            fs_err::remove_dir_all(&downloads)?;
        }
        fs_err::create_dir_all(&downloads)?;
        fs_err::create_dir_all(&outputs)?;

        progress.set_message(&format!("downloading {}", family));
        let bytes = self.download_all(grants, &downloads).await?;
        debug!("Downloaded {} bytes for {}", bytes, family);

        let mut record = AttestationRecord::new();
        for task in tasks {
            progress.set_message(&format!("contributing to {}", task.circuit.qualified_name()));
            let input = downloads.join(&task.input);
            let output = outputs.join(&task.output);
            remove_file_if_exists(&output)?;

            let hash = self.contribute(&input, &output).await?;
            if !output.is_file() {
                return Err(CeremonyError::ContributionNotProduced(task.output));
            }
            record.append(&task.circuit.canonical_name(), &hash)?;

            progress.set_message(&format!("uploading {}", task.output));
            self.transport.upload(&task.upload, &output).await?;
            uploaded.insert(format!("{}/{}", family, task.output));
            info!("Contributed to {} ({})", task.circuit.qualified_name(), hash);

            link.record(task.circuit, LinkFiles::commitment(output));
            progress.inc(1);
        }
        if record.is_empty() {
            return Err(CeremonyError::EmptyRound(family.to_string()));
        }

        let attestation = manifest.attestation_file_name();
        let log = outputs.join(&attestation);
        record.store(&log)?;
        let url = grants
            .upload
            .get(&attestation)
            .ok_or_else(|| CeremonyError::MissingUploadGrant(format!("{}/{}", family, attestation)))?;
        self.transport.upload(url, &log).await?;
        uploaded.insert(format!("{}/{}", family, attestation));

        self.retain(manifest, family, &downloads)?;
        Ok(record)
    }

    /// Fetches every download of a family with bounded concurrency. Returns the total bytes.
    async fn download_all(&self, grants: &FamilyGrants, downloads: &Path) -> Result<u64, CeremonyError> {
        let sizes: Vec<u64> = stream::iter(grants.download.iter())
            .map(|(file, url)| {
                let destination = downloads.join(file);
                async move { self.transport.download(url, &destination).await }
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        Ok(sizes.iter().sum())
    }

    /// Runs one contribution on the blocking pool. The setup binary never runs twice at once.
    async fn contribute(&self, input: &Path, output: &Path) -> Result<String, CeremonyError> {
        let setup = Arc::clone(&self.setup);
        let (input, output) = (input.to_path_buf(), output.to_path_buf());
        tokio::task::spawn_blocking(move || setup.phase2_contribute(&input, &output))
            .await
            .map_err(|error| CeremonyError::ToolFailed("phase 2 contribution".to_string(), error.to_string()))?
    }

    /// Moves the predecessor's files of a family out of the download area.
    fn retain(&self, manifest: &ExchangeManifest, family: Family, downloads: &Path) -> Result<(), CeremonyError> {
        let retained = self.retained_directory(manifest, family);
        fs_err::create_dir_all(&retained)?;
        for entry in fs_err::read_dir(downloads)? {
            let entry = entry?;
            fs_err::rename(entry.path(), retained.join(entry.file_name()))?;
        }
        fs_err::remove_dir_all(downloads)?;
        debug!("Retained the {} inputs in {}", family, retained.display());
        Ok(())
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(total);
        progress.set_style(
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}"),
        );
        progress.enable_steady_tick(1000);
        progress
    }
}
