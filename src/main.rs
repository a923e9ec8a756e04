mod app;
mod commands;
mod config;
mod iso;
mod logging;
mod node;
mod ui;
mod vm;
mod wizard;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use crossterm::{
    cursor, execute,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use app::{App, Outcome};
use config::{ConfigKey, ConfigStore, Package};
use iso::progress::{format_bytes, render_bar, TransferProgress, BAR_WIDTH};
use iso::{DeleteOutcome, ImageManager, IsoImage};
use node::NodeInventory;

#[derive(Parser)]
#[command(name = "pxc")]
#[command(version)]
#[command(about = "Create Proxmox VE virtual machines and manage ISO images")]
struct Cli {
    /// Subcommand to run (default: the VM creation wizard)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a VM with the interactive wizard
    Create {
        /// Package whose values pre-fill the wizard
        #[arg(short, long)]
        package: Option<String>,
    },

    /// Manage ISO images
    Iso {
        #[command(subcommand)]
        action: IsoAction,
    },

    /// Show or edit saved defaults
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage named packages of VM defaults
    Package {
        #[command(subcommand)]
        action: PackageAction,
    },
}

#[derive(Subcommand)]
enum IsoAction {
    /// List ISO images on every ISO-capable storage
    List,
    /// Copy a local ISO file into a storage
    Upload {
        /// Path to the ISO file
        file: PathBuf,
        /// Target storage (default: configured isoStorage)
        #[arg(short, long)]
        storage: Option<String>,
    },
    /// Download an ISO from a URL into a storage
    Download {
        url: String,
        /// Target storage (default: configured isoStorage)
        #[arg(short, long)]
        storage: Option<String>,
        /// File name to save as (default: last segment of the URL)
        #[arg(short, long)]
        filename: Option<String>,
    },
    /// Delete an ISO by file name or volume id
    Delete {
        name: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration file
    Show,
    /// Print one default
    Get {
        key: ConfigKey,
    },
    /// Set one default
    Set {
        key: ConfigKey,
        value: String,
    },
    /// Remove one default
    Unset {
        key: ConfigKey,
    },
}

#[derive(Subcommand)]
enum PackageAction {
    /// List package names
    List,
    /// Show one package
    Show {
        name: String,
    },
    /// Create a package or update the given fields of an existing one
    Set {
        name: String,
        #[command(flatten)]
        values: PackageArgs,
    },
    /// Delete a package
    Delete {
        name: String,
    },
}

#[derive(Args, Default)]
struct PackageArgs {
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(vm::spec::MAX_CORES)))]
    cores: Option<u32>,
    /// Memory in MB
    #[arg(long, value_parser = clap::value_parser!(u32).range(
        i64::from(vm::spec::MIN_MEMORY_MB)..=i64::from(vm::spec::MAX_MEMORY_MB)
    ))]
    memory: Option<u32>,
    /// Disk size in GB
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(vm::spec::MAX_DISK_GB)))]
    disk: Option<u32>,
    #[arg(long)]
    vm_storage: Option<String>,
    #[arg(long)]
    iso_storage: Option<String>,
    #[arg(long)]
    bridge: Option<String>,
    #[arg(long)]
    node: Option<String>,
}

impl PackageArgs {
    /// Overlay the given flags onto `package`
    fn apply(self, package: &mut Package) {
        let over = Package {
            iso_storage: self.iso_storage,
            vm_storage: self.vm_storage,
            bridge: self.bridge,
            cores: self.cores,
            memory: self.memory,
            disk: self.disk,
            node: self.node,
        };
        *package = package.overridden_by(&over);
    }
}

fn main() {
    let cli = Cli::parse();

    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> Result<i32> {
    let store = ConfigStore::default_paths();

    match cli.command {
        None => run_wizard(&store, None),
        Some(Commands::Create { package }) => run_wizard(&store, package),
        Some(Commands::Iso { action }) => {
            logging::init_stderr();
            let manager = ImageManager::new(inventory(&store, None), store.clone());
            cmd_iso(&manager, action)?;
            Ok(0)
        }
        Some(Commands::Config { action }) => {
            logging::init_stderr();
            cmd_config(&store, action)?;
            Ok(0)
        }
        Some(Commands::Package { action }) => {
            logging::init_stderr();
            cmd_package(&store, action)?;
            Ok(0)
        }
    }
}

/// Node inventory for the configured node, else this host
fn inventory(store: &ConfigStore, package: Option<&str>) -> NodeInventory {
    let node = store.resolve_defaults(package).node;
    NodeInventory::new(commands::system_runner(), node.as_deref())
}

/// Guard that ensures terminal is restored on drop (even on panic)
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        // Best effort restoration - ignore errors since we may be panicking
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, cursor::Show);
    }
}

fn run_wizard(store: &ConfigStore, package: Option<String>) -> Result<i32> {
    if let Some(ref name) = package {
        if store.package(name).is_none() {
            bail!("Unknown package: {}", name);
        }
    }

    let log_path = logging::init_file();
    tracing::info!(?package, "starting wizard");

    let inventory = inventory(store, package.as_deref());
    let app = App::new(inventory, store.clone(), package);
    let outcome = run_tui(app)?;

    match &outcome {
        Outcome::Created { vmid, name } => println!("VM {} ({}) created", vmid, name),
        Outcome::Failed(message) => {
            eprintln!("Error: {}", message);
            if let Some(path) = log_path {
                eprintln!("Details: {}", path.display());
            }
        }
        Outcome::Cancelled => println!("Cancelled, no VM was created"),
        Outcome::Interrupted => {}
    }
    Ok(outcome.exit_code())
}

fn run_tui(mut app: App) -> Result<Outcome> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    // Create guard AFTER setup so it only cleans up if setup succeeded
    let _guard = TerminalGuard;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;

    ui::run(&mut terminal, &mut app)?;
    Ok(app.outcome())
}

fn cmd_iso(manager: &ImageManager, action: IsoAction) -> Result<()> {
    match action {
        IsoAction::List => {
            let mut images = manager.list();
            if images.is_empty() {
                println!("No ISOs found");
                return Ok(());
            }
            images.sort_by(|a, b| a.filename.cmp(&b.filename));
            for line in iso_table(&images) {
                println!("{}", line);
            }
        }
        IsoAction::Upload { file, storage } => {
            let target = manager.resolve_target_storage(storage.as_deref())?;
            println!("Uploading {} to {}...", display_name(&file), target.name);

            let volid = manager
                .upload(&file, &target.name)
                .context("Failed to upload ISO")?;
            println!("ISO uploaded successfully");
            println!("Volume ID: {}", volid);
            if target.saved_as_default {
                println!("Saved {} as default ISO storage", target.name);
            }
        }
        IsoAction::Download { url, storage, filename } => {
            let target = manager.resolve_target_storage(storage.as_deref())?;
            let shown = filename
                .clone()
                .unwrap_or_else(|| iso::download::filename_from_url(&url));
            println!("Downloading: {}", shown);
            println!("To: {}", target.name);

            let mut stdout = io::stdout();
            let result = manager.download(&url, &target.name, filename.as_deref(), |p| {
                // Progress is cosmetic; a failed redraw must not abort the transfer
                let _ = execute!(stdout, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine));
                let _ = write!(stdout, "{}", progress_line(p));
                let _ = stdout.flush();
            });
            println!();

            let volid = result.context("Failed to download ISO")?;
            println!("ISO downloaded successfully");
            println!("Volume ID: {}", volid);
            if target.saved_as_default {
                println!("Saved {} as default ISO storage", target.name);
            }
        }
        IsoAction::Delete { name } => {
            match manager.delete(&name).context("Failed to delete ISO")? {
                DeleteOutcome::Deleted(image) => println!("ISO deleted: {}", image.volid),
                DeleteOutcome::NotFound => bail!("ISO not found: {}", name),
            }
        }
    }
    Ok(())
}

fn display_name(file: &Path) -> String {
    file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string())
}

/// `NAME / STORAGE / SIZE` table with a count footer
fn iso_table(images: &[IsoImage]) -> Vec<String> {
    let name_width = images
        .iter()
        .map(|i| i.filename.len())
        .max()
        .unwrap_or(0)
        .max(30)
        + 2;
    let storage_width = images
        .iter()
        .map(|i| i.storage.len())
        .max()
        .unwrap_or(0)
        .max(10)
        + 2;

    let mut lines = vec![format!(
        "{:<nw$}{:<sw$}{}",
        "NAME",
        "STORAGE",
        "SIZE",
        nw = name_width,
        sw = storage_width
    )];
    for image in images {
        let size = if image.size == 0 {
            "-".to_string()
        } else {
            format_bytes(image.size)
        };
        lines.push(format!(
            "{:<nw$}{:<sw$}{}",
            image.filename,
            image.storage,
            size,
            nw = name_width,
            sw = storage_width
        ));
    }
    lines.push(String::new());
    lines.push(format!(
        "{} ISO{}",
        images.len(),
        if images.len() == 1 { "" } else { "s" }
    ));
    lines
}

/// One redraw of the download progress line
fn progress_line(p: &TransferProgress) -> String {
    let status = p.status_line();
    match p.percent {
        Some(percent) => format!("{} {:>3}%  {}", render_bar(percent, BAR_WIDTH), percent, status),
        None => status,
    }
}

fn cmd_config(store: &ConfigStore, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = store.load();
            println!("Configuration");
            if let Some(path) = store.path() {
                println!("{}", path.display());
            }
            println!();

            let defaults: Vec<(ConfigKey, String)> = ConfigKey::ALL
                .into_iter()
                .filter(|k| *k != ConfigKey::SavePreferences)
                .filter_map(|k| config.get(k).map(|v| (k, v)))
                .collect();
            let save_preferences = config.get(ConfigKey::SavePreferences);

            if defaults.is_empty() && save_preferences.is_none() && config.packages.is_empty() {
                println!("No configuration set");
                return Ok(());
            }

            if !defaults.is_empty() {
                println!("defaults:");
                for (key, value) in defaults {
                    println!("  {}: {}", key, value);
                }
            }
            if let Some(value) = save_preferences {
                println!("ui:");
                println!("  {}: {}", ConfigKey::SavePreferences, value);
            }
            if !config.packages.is_empty() {
                println!("packages:");
                for (name, package) in &config.packages {
                    println!("  {}: {}", name, package_summary(package));
                }
            }
        }
        ConfigAction::Get { key } => match store.get_default(key) {
            Some(value) => println!("{}", value),
            None => bail!("{} is not set", key),
        },
        ConfigAction::Set { key, value } => {
            if key == ConfigKey::Package && store.package(&value).is_none() {
                bail!("Unknown package: {}", value);
            }
            store.set_default(key, &value)?;
            println!("Set {} = {}", key, value);
        }
        ConfigAction::Unset { key } => {
            store.unset_default(key)?;
            println!("Unset {}", key);
        }
    }
    Ok(())
}

fn package_summary(package: &Package) -> String {
    let entries = package.entries();
    if entries.is_empty() {
        return "(empty)".to_string();
    }
    entries
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn cmd_package(store: &ConfigStore, action: PackageAction) -> Result<()> {
    match action {
        PackageAction::List => {
            let config = store.load();
            if config.packages.is_empty() {
                println!("No packages defined");
                return Ok(());
            }
            let default = config.defaults.package.as_deref();
            for (name, package) in &config.packages {
                let marker = if Some(name.as_str()) == default { "*" } else { " " };
                println!("{} {:<16} {}", marker, name, package_summary(package));
            }
        }
        PackageAction::Show { name } => {
            let Some(package) = store.package(&name) else {
                bail!("Unknown package: {}", name);
            };
            println!("{}:", name);
            for (key, value) in package.entries() {
                println!("  {}: {}", key, value);
            }
        }
        PackageAction::Set { name, values } => {
            let mut package = store.package(&name).unwrap_or_default();
            values.apply(&mut package);
            store.set_package(&name, package)?;
            println!("Saved package {}", name);
        }
        PackageAction::Delete { name } => {
            if !store.delete_package(&name)? {
                bail!("Unknown package: {}", name);
            }
            println!("Deleted package {}", name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_iso_table() {
        let images = vec![
            IsoImage::from_volid("local:iso/alpine.iso", 0),
            IsoImage::from_volid("nas:iso/debian-12.iso", 658_505_728),
        ];
        let lines = iso_table(&images);

        assert!(lines[0].starts_with("NAME"));
        assert_eq!(lines[0].find("STORAGE"), Some(32));
        assert!(lines[1].starts_with("alpine.iso"));
        assert!(lines[1].ends_with('-'));
        assert!(lines[2].ends_with("628.0 MB"));
        assert_eq!(lines.last().map(String::as_str), Some("2 ISOs"));

        let one = iso_table(&images[..1]);
        assert_eq!(one.last().map(String::as_str), Some("1 ISO"));
    }

    #[test]
    fn test_progress_line() {
        let known = TransferProgress {
            percent: Some(50),
            downloaded: 512,
            total: 1024,
            ..Default::default()
        };
        assert!(progress_line(&known).contains(" 50%"));

        let unknown = TransferProgress {
            downloaded: 2048,
            ..Default::default()
        };
        assert_eq!(progress_line(&unknown), "2.0 KB");
    }

    #[test]
    fn test_package_args_only_touch_given_fields() {
        let mut package = Package {
            cores: Some(2),
            bridge: Some("vmbr0".into()),
            ..Default::default()
        };
        PackageArgs {
            cores: Some(8),
            ..Default::default()
        }
        .apply(&mut package);

        assert_eq!(package.cores, Some(8));
        assert_eq!(package.bridge.as_deref(), Some("vmbr0"));
    }

    #[test]
    fn test_package_args_reject_out_of_range() {
        assert!(Cli::try_parse_from(["pxc", "package", "set", "big", "--cores", "129"]).is_err());
        assert!(Cli::try_parse_from(["pxc", "package", "set", "big", "--memory", "32"]).is_err());
        assert!(Cli::try_parse_from(["pxc", "package", "set", "big", "--cores", "4"]).is_ok());
    }
}
