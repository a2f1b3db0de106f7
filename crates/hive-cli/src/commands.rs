use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use hive_ops::{manifest, scan, Hive, HiveConfig};
use hive_pack::{apply_bundle, bundle_from_store, BundleReader};
use hive_sync::TransportRegistry;
use hive_types::ManifestKey;
use hive_view::{DiffKind, ElementPath, ElementView, TreeDiff, TreeVisitor, ViewKind};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let store = cli.store;
    match cli.command {
        Command::Init(args) => cmd_init(args.path.as_deref().unwrap_or(store.as_path())),
        Command::Import(args) => cmd_import(&open(&store)?, args),
        Command::Export(args) => cmd_export(&open(&store)?, args),
        Command::List(args) => cmd_list(&open(&store)?, args),
        Command::Show(args) => cmd_show(&open(&store)?, args),
        Command::Cat(args) => cmd_cat(&open(&store)?, args),
        Command::Delete(args) => cmd_delete(&open(&store)?, args),
        Command::Retain(args) => cmd_retain(&open(&store)?, args),
        Command::Diff(args) => cmd_diff(&open(&store)?, args),
        Command::Verify(args) => cmd_verify(&open(&store)?, args),
        Command::Fsck(args) => cmd_fsck(&open(&store)?, args),
        Command::Prune(_) => cmd_prune(&open(&store)?),
        Command::Copy(args) => cmd_copy(&open(&store)?, args),
        Command::Push(args) => cmd_push(&open(&store)?, args),
        Command::Fetch(args) => cmd_fetch(&open(&store)?, args),
        Command::Bundle(args) => cmd_bundle(&open(&store)?, args),
        Command::Unbundle(args) => cmd_unbundle(&open(&store)?, args),
        Command::Config(args) => cmd_config(&store, args),
    }
}

fn open(path: &Path) -> anyhow::Result<Hive> {
    Hive::open(path).with_context(|| format!("opening store at {}", path.display()))
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

fn cmd_init(path: &Path) -> anyhow::Result<()> {
    let hive = open(path)?;
    println!("{} Initialized store in {}", "✓".green().bold(), hive.name().bold());
    Ok(())
}

/// Import `source` under `raw`, allocating the tag inside the same write
/// scope so concurrent imports of one name get distinct tags.
pub(crate) fn import_as(
    hive: &Hive,
    source: &Path,
    raw: &str,
    labels: BTreeMap<String, String>,
) -> anyhow::Result<ManifestKey> {
    let tx = hive.begin()?;
    let key = resolve_import_key(hive, raw)?;
    let key = hive_ops::import_directory(hive, source, key, labels)?;
    tx.commit()?;
    Ok(key)
}

/// `name:tag` as given, or `name` with the next free numeric tag.
pub(crate) fn resolve_import_key(hive: &Hive, raw: &str) -> anyhow::Result<ManifestKey> {
    if raw.contains(':') {
        Ok(raw.parse()?)
    } else {
        Ok(manifest::next_key(hive, raw)?)
    }
}

pub(crate) fn parse_labels(raw: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|label| {
            label
                .split_once('=')
                .filter(|(name, _)| !name.is_empty())
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .ok_or_else(|| anyhow!("label must be name=value: {label}"))
        })
        .collect()
}

fn cmd_import(hive: &Hive, args: ImportArgs) -> anyhow::Result<()> {
    let labels = parse_labels(&args.labels)?;
    let key = import_as(hive, &args.source, &args.key, labels)?;
    let root = manifest::load(hive, &key)?.root();
    println!("{} Imported {} as {}", "✓".green().bold(), args.source.display(), key.to_string().yellow());
    println!("  Root: {}", root.short_hex().cyan());
    Ok(())
}

fn cmd_export(hive: &Hive, args: ExportArgs) -> anyhow::Result<()> {
    let report = hive_ops::export(hive, &args.key, &args.target)?;
    println!(
        "{} Exported {} to {}: {} files, {} directories, {} bytes",
        "✓".green().bold(),
        args.key.to_string().yellow(),
        args.target.display(),
        report.files,
        report.directories,
        report.bytes
    );
    Ok(())
}

fn cmd_list(hive: &Hive, args: ListArgs) -> anyhow::Result<()> {
    let keys = manifest::list(hive, &args.prefix)?;
    if keys.is_empty() {
        println!("No manifests.");
    }
    for key in keys {
        let root = manifest::load(hive, &key)?.root();
        println!("{}  {}", root.short_hex().dimmed(), key.to_string().yellow());
    }
    Ok(())
}

/// Indented tree listing.
#[derive(Default)]
struct Printer {
    last_ref: Option<ElementPath>,
}

impl Printer {
    fn line(&self, element: &ElementView, label: colored::ColoredString) {
        let indent = "  ".repeat(element.path.depth().saturating_sub(1));
        println!("{indent}{label} {}", element.id.short_hex().dimmed());
    }
}

impl TreeVisitor for Printer {
    fn on_tree(&mut self, element: &ElementView) {
        // The root tree of a reference shares the reference's line.
        if element.path.is_root() || self.last_ref.as_ref() == Some(&element.path) {
            return;
        }
        self.line(element, format!("{}/", element.name()).bold());
    }

    fn on_blob(&mut self, element: &ElementView) {
        self.line(element, element.name().normal());
    }

    fn on_manifest_ref(&mut self, element: &ElementView) {
        let target = match &element.kind {
            ViewKind::ManifestRef { key, .. } => key.to_string(),
            _ => String::new(),
        };
        self.line(element, format!("{} -> {}", element.name(), target).cyan());
        self.last_ref = Some(element.path.clone());
    }

    fn on_missing(&mut self, element: &ElementView) {
        self.line(element, format!("{} (missing)", element.name()).red());
    }

    fn on_damaged(&mut self, element: &ElementView) {
        self.line(element, format!("{} (damaged)", element.name()).red().bold());
    }

    fn on_malformed(&mut self, element: &ElementView) {
        self.line(element, format!("{} (malformed)", element.name()).red());
    }

    fn on_skipped(&mut self, element: &ElementView) {
        self.line(element, format!("{} ...", element.name()).dimmed());
    }
}

fn cmd_show(hive: &Hive, args: ShowArgs) -> anyhow::Result<()> {
    let m = manifest::load(hive, &args.key)?;
    println!("Manifest {}", m.key().to_string().yellow().bold());
    println!("  Root: {}", m.root().to_hex().cyan());
    for (name, value) in m.labels() {
        println!("  {name}: {value}");
    }
    println!();
    let view = scan::scan_manifest(hive, &args.key, args.depth)?;
    view.visit(&mut Printer::default());
    Ok(())
}

fn cmd_cat(hive: &Hive, args: CatArgs) -> anyhow::Result<()> {
    let data = scan::tree_entry_load(hive, &args.key, &args.path)?;
    std::io::stdout().write_all(&data)?;
    Ok(())
}

fn cmd_delete(hive: &Hive, args: DeleteArgs) -> anyhow::Result<()> {
    if !manifest::delete(hive, &args.key)? {
        bail!("no such manifest: {}", args.key);
    }
    println!("Deleted {}", args.key.to_string().yellow());
    Ok(())
}

fn cmd_retain(hive: &Hive, args: RetainArgs) -> anyhow::Result<()> {
    let deleted = manifest::delete_old_by_id(hive, &args.name, args.keep)?;
    for key in &deleted {
        println!("  {} {}", "deleted:".red(), key);
    }
    println!("{} Kept the newest {} tag(s) of {}", "✓".green(), args.keep, args.name.bold());
    Ok(())
}

fn cmd_diff(hive: &Hive, args: DiffArgs) -> anyhow::Result<()> {
    let old = scan::scan_manifest(hive, &args.old, None)?;
    let new = scan::scan_manifest(hive, &args.new, None)?;
    let diff = TreeDiff::compute(&old, &new);
    if diff.is_empty() {
        println!("No changes.");
    }
    for entry in &diff.entries {
        let path = entry.path.to_string();
        match entry.kind {
            DiffKind::Added => println!("{} {}", "+".green(), path.green()),
            DiffKind::Removed => println!("{} {}", "-".red(), path.red()),
            DiffKind::Modified => println!("{} {}", "~".yellow(), path),
        }
    }
    Ok(())
}

fn cmd_verify(hive: &Hive, args: VerifyArgs) -> anyhow::Result<()> {
    let report = hive_ops::verify(hive, &args.key, &args.dir)?;
    for entry in &report.entries {
        let status = entry.status.to_string();
        let status = match entry.status {
            hive_ops::VerifyStatus::Unmodified => status.green(),
            hive_ops::VerifyStatus::Modified => status.yellow(),
            hive_ops::VerifyStatus::Missing => status.red(),
        };
        println!("{status:>10}  {}", entry.path);
    }
    if !report.is_clean() {
        bail!("{} does not match {}", args.dir.display(), args.key);
    }
    println!("{} {} matches {}", "✓".green().bold(), args.dir.display(), args.key);
    Ok(())
}

fn cmd_fsck(hive: &Hive, args: FsckArgs) -> anyhow::Result<()> {
    let report = hive_ops::fsck(hive, &args.keys, args.dry_run)?;
    for element in &report.objects.damaged {
        println!("{} {} {}", "damaged:".red().bold(), element.id.to_hex(), element.path);
    }
    for element in &report.objects.malformed {
        println!("{} {} {}", "malformed:".red(), element.id.to_hex(), element.path);
    }
    for id in &report.objects.removed {
        println!("{} {}", "removed:".yellow(), id.to_hex());
    }
    for element in &report.manifests.missing {
        println!("{} {} {}", "missing:".red(), element.id.to_hex(), element.path);
    }
    for key in &report.manifests.dangling {
        println!("{} {}", "dangling reference:".red(), key);
    }
    if report.is_clean() {
        println!("{} No issues.", "✓".green().bold());
        return Ok(());
    }
    bail!("store has consistency problems");
}

fn cmd_prune(hive: &Hive) -> anyhow::Result<()> {
    let report = hive_ops::prune(hive)?;
    println!(
        "{} Pruned {} object(s), {} bytes freed ({} reachable, {} recent kept)",
        "✓".green(),
        report.removed.len(),
        report.bytes_freed,
        report.reachable,
        report.retained_recent
    );
    Ok(())
}

fn cmd_copy(hive: &Hive, args: CopyArgs) -> anyhow::Result<()> {
    let destination = open(&args.destination)?;
    let report = hive_ops::copy(hive, &destination, &args.keys, args.partial)?;
    for key in &report.manifests {
        println!("  {} {}", "copied:".green(), key);
    }
    println!(
        "{} {} object(s), {} bytes to {}",
        "✓".green(),
        report.objects,
        report.bytes,
        destination.name().bold()
    );
    Ok(())
}

fn cmd_push(hive: &Hive, args: PushArgs) -> anyhow::Result<()> {
    let report = runtime()?.block_on(async {
        let remote = TransportRegistry::standard().connect(&args.remote).await?;
        hive_sync::push(hive, remote.as_ref(), &args.keys).await
    })?;
    if report.is_noop() {
        println!("Pushing to {}... {}", args.remote.bold(), "up to date".green());
        return Ok(());
    }
    for key in &report.manifests_sent {
        println!("  {} {}", "sent:".green(), key);
    }
    println!(
        "{} {} object(s) sent, {} already present, {} bytes",
        "✓".green(),
        report.objects_sent,
        report.objects_skipped,
        report.bytes_transferred
    );
    Ok(())
}

fn cmd_fetch(hive: &Hive, args: FetchArgs) -> anyhow::Result<()> {
    let report = runtime()?.block_on(async {
        let remote = TransportRegistry::standard().connect(&args.remote).await?;
        hive_sync::fetch(hive, remote.as_ref(), &args.keys).await
    })?;
    if report.is_noop() {
        println!("Fetching from {}... {}", args.remote.bold(), "up to date".green());
        return Ok(());
    }
    for key in &report.manifests_received {
        println!("  {} {}", "received:".green(), key);
    }
    println!(
        "{} {} object(s) received, {} already present, {} bytes",
        "✓".green(),
        report.objects_received,
        report.objects_skipped,
        report.bytes_transferred
    );
    Ok(())
}

fn cmd_bundle(hive: &Hive, args: BundleArgs) -> anyhow::Result<()> {
    let mut keys = Vec::new();
    let mut roots = Vec::new();
    for key in scan::manifest_closure(hive, &args.keys)? {
        // Dangling references have nothing to carry.
        if let Some(m) = hive.manifests().get_manifest(&key)? {
            roots.push(m.root());
            keys.push(key);
        }
    }
    let objects = hive_ops::required_objects(hive, &roots, &[])?;
    let file = bundle_from_store(hive, &objects, &keys)?.finish(&args.output)?;
    println!(
        "{} Wrote {}: {} object(s), {} manifest(s)",
        "✓".green().bold(),
        file.path.display(),
        file.object_count,
        file.manifest_count
    );
    Ok(())
}

fn cmd_unbundle(hive: &Hive, args: UnbundleArgs) -> anyhow::Result<()> {
    let bundle = BundleReader::open(&args.file)
        .with_context(|| format!("reading bundle {}", args.file.display()))?;
    let report = apply_bundle(hive, &bundle)?;
    for key in &report.manifests_added {
        println!("  {} {}", "added:".green(), key);
    }
    for key in &report.manifests_skipped {
        println!("  {} {}", "present:".dimmed(), key);
    }
    println!(
        "{} {} object(s) written, {} already present",
        "✓".green(),
        report.objects_written,
        report.objects_present
    );
    Ok(())
}

/// Integer and boolean literals keep their type; anything else is a string.
pub(crate) fn parse_scalar(raw: &str) -> toml::Value {
    if let Ok(n) = raw.parse::<i64>() {
        toml::Value::Integer(n)
    } else if let Ok(b) = raw.parse::<bool>() {
        toml::Value::Boolean(b)
    } else {
        toml::Value::String(raw.to_string())
    }
}

pub(crate) fn set_config_value(
    config: &HiveConfig,
    key: &str,
    raw: &str,
) -> anyhow::Result<HiveConfig> {
    let mut value = toml::Value::try_from(config)?;
    let table = value
        .as_table_mut()
        .ok_or_else(|| anyhow!("configuration is not a table"))?;
    if !table.contains_key(key) {
        bail!("unknown configuration key: {key}");
    }
    table.insert(key.to_string(), parse_scalar(raw));
    value
        .try_into()
        .with_context(|| format!("invalid value for {key}: {raw}"))
}

fn cmd_config(store: &Path, args: ConfigArgs) -> anyhow::Result<()> {
    let config = HiveConfig::load(store)?;
    match (&args.key, &args.value) {
        (Some(key), Some(value)) => {
            let updated = set_config_value(&config, key, value)?;
            updated.save(store)?;
            println!("Set {} = {}", key.bold(), value);
        }
        (Some(key), None) => {
            let value = toml::Value::try_from(&config)?;
            match value.get(key.as_str()) {
                Some(v) => println!("{} = {}", key.bold(), v),
                None => bail!("unknown configuration key: {key}"),
            }
        }
        _ => print!("{}", toml::to_string_pretty(&config)?),
    }
    Ok(())
}
