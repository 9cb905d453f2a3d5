use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use schemaweave_core::{Config, ConfigError, Diagnostic, DiagnosticCode, Location, RunReport, Severity};
use schemaweave_engine::{Emitter, LoadError, Loader, Mutation, ResolveError, RuleResolver, Session};
use schemaweave_toolchain::build_features;

/// SchemaWeave - merge schema fragments into one document
#[derive(Parser)]
#[command(name = "schemaweave")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: schemaweave.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge fragments, resolve conflicts and write the merged document
    Merge {
        /// Output file for report.json
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// List current name conflicts and the relations pointing at them
    Conflicts,

    /// Patch the generated client and materialize feature packages
    Patch {
        /// Output file for report.json
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Merge, run the generator command, then patch
    Generate {
        /// Output file for report.json
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from("schemaweave.toml"));
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if cli.verbose {
        eprintln!("{} {}", "Project root:".cyan(), config.project_root.display());
    }

    match cli.command {
        Commands::Merge { report } => {
            let mut run = RunReport::new();
            merge(&config, &mut run, cli.verbose)?;
            finish(&run, report.as_deref(), "Merge Report")
        }
        Commands::Conflicts => conflicts_command(&config),
        Commands::Patch { report } => {
            let mut run = RunReport::new();
            patch(&config, &mut run, cli.verbose)?;
            finish(&run, report.as_deref(), "Patch Report")
        }
        Commands::Generate { report } => {
            let mut run = RunReport::new();
            if merge(&config, &mut run, cli.verbose)? {
                run_generator(&config, cli.verbose)?;
                patch(&config, &mut run, cli.verbose)?;
            }
            finish(&run, report.as_deref(), "Generate Report")
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load, resolve and emit; false when resolution failed and nothing was written
fn merge(config: &Config, report: &mut RunReport, verbose: bool) -> Result<bool> {
    if verbose {
        eprintln!("{}", "Loading fragments...".cyan());
    }

    let store = match Loader::new(config).load() {
        Ok(store) => store,
        Err(e) => match load_diagnostic(&e) {
            Some(diagnostic) => {
                report.add_diagnostic(diagnostic);
                return Ok(false);
            }
            None => return Err(e).context("Failed to load schema fragments"),
        },
    };
    let mut session = Session::from_config(store, config)?;
    let mut resolver = RuleResolver::from_config(config)?;

    for conflict in session.conflicts() {
        let line = session.store().model(&conflict.right).map(|m| m.line);
        let location = match line {
            Some(line) => Location::with_line(conflict.right.file.clone(), line),
            None => Location::new(conflict.right.file.clone()),
        };
        report.add_diagnostic(
            Diagnostic::new(DiagnosticCode::MergeNameConflict, Severity::Info, conflict.to_string())
                .with_location(location)
                .with_subjects(vec![conflict.left.to_string(), conflict.right.to_string()]),
        );
    }

    for (child, parent) in session.extended_links() {
        if !session.store().contains(parent) {
            report.add_diagnostic(
                Diagnostic::new(
                    DiagnosticCode::Warning,
                    Severity::Warn,
                    format!("{} extends {}, which was not loaded", child, parent),
                )
                .with_subjects(vec![child.to_string(), parent.to_string()]),
            );
        }
    }

    if verbose {
        eprintln!(
            "{} {} configured resolutions",
            "Resolving conflicts with".cyan(),
            resolver.len()
        );
    }

    match session.resolve(&mut resolver) {
        Ok(outcome) => report.summary.conflicts_resolved = outcome.resolved,
        Err(
            e @ (ResolveError::Unresolved(_)
            | ResolveError::InvalidChoice { .. }
            | ResolveError::NameTaken { .. }
            | ResolveError::Stalled(_)),
        ) => {
            let subjects = session
                .conflicts()
                .iter()
                .flat_map(|c| [c.left.to_string(), c.right.to_string()])
                .collect();
            let hint = match e {
                ResolveError::Unresolved(_) => "; add a [[resolve]] entry",
                _ => "",
            };
            report.add_diagnostic(
                Diagnostic::new(
                    DiagnosticCode::MergeUnresolvedConflict,
                    Severity::Error,
                    format!("{}{}", e, hint),
                )
                .with_subjects(subjects),
            );
            return Ok(false);
        }
        Err(ResolveError::CrossFileRelation { column, target }) => {
            report.add_diagnostic(
                Diagnostic::new(
                    DiagnosticCode::MergeCrossFileRelation,
                    Severity::Error,
                    format!(
                        "{} refers to {} across fragments; set cross_file_relations = true or add a [relations] entry",
                        column, target
                    ),
                )
                .with_location(Location::new(column.model.file.clone()))
                .with_subjects(vec![column.to_string(), target.to_string()]),
            );
            return Ok(false);
        }
        Err(e @ ResolveError::IntrospectionDiverged { .. }) => {
            report.add_diagnostic(Diagnostic::new(
                DiagnosticCode::MergeIntrospectionDiverged,
                Severity::Error,
                e.to_string(),
            ));
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    }

    for mutation in &session.log().entries {
        let (message, subject) = match mutation {
            Mutation::Removed { key, item } => (format!("skipped {} {}", item, key), key.to_string()),
            Mutation::Renamed { from, to, retyped } => (
                format!("renamed {} to {} ({} columns retyped)", from, to.name, retyped),
                from.to_string(),
            ),
            Mutation::Remapped { from, to, shadowed } => {
                let message = match shadowed {
                    Some(shadow) => format!("remapped {} to {} (shadows {})", from, to, shadow),
                    None => format!("remapped {} to {}", from, to),
                };
                (message, from.to_string())
            }
            Mutation::AttributeAdded { key, attribute } => {
                (format!("added {} to {}", attribute, key), key.to_string())
            }
            Mutation::NameTaken { key, name } => {
                report.add_diagnostic(
                    Diagnostic::new(
                        DiagnosticCode::Warning,
                        Severity::Warn,
                        format!("rename of {} to {} refused: the name is taken", key, name),
                    )
                    .with_location(Location::new(key.file.clone()))
                    .with_subjects(vec![key.to_string()]),
                );
                continue;
            }
            Mutation::Absent { .. } => continue,
        };

        report.add_diagnostic(
            Diagnostic::new(DiagnosticCode::MergeActionApplied, Severity::Info, message)
                .with_subjects(vec![subject]),
        );
    }

    let generators = config.generators.iter().filter(|g| g.enabled).map(|g| g.render());
    let emitted = Emitter::new(&session).with_blocks(generators).emit();

    let output = config.resolve_path(&config.output.schema);
    emitted
        .write_to(&output)
        .with_context(|| format!("Failed to write merged schema to {}", output.display()))?;

    report.summary.models_emitted = emitted.models;
    report.summary.enums_emitted = emitted.enums;

    if verbose {
        eprintln!("{} {}", "Merged schema written to:".green(), output.display());
    }

    Ok(true)
}

/// Configuration problems found while loading, as report diagnostics
fn load_diagnostic(error: &LoadError) -> Option<Diagnostic> {
    let code = match error {
        LoadError::MissingBase => DiagnosticCode::ConfigMissingBase,
        LoadError::Config(ConfigError::MissingField(field)) if field == "base" => DiagnosticCode::ConfigMissingBase,
        LoadError::Config(ConfigError::MissingField(_)) => DiagnosticCode::ConfigMissingField,
        LoadError::MissingGenerator(_) => DiagnosticCode::ConfigMissingGenerator,
        LoadError::MissingDatasource(_) => DiagnosticCode::ConfigMissingDatasource,
        _ => return None,
    };

    let diagnostic = Diagnostic::new(code, Severity::Error, error.to_string());
    Some(match error {
        LoadError::MissingGenerator(file) | LoadError::MissingDatasource(file) => {
            diagnostic.with_location(Location::new(file.clone()))
        }
        _ => diagnostic,
    })
}

/// Conflicts command - show what `merge` would have to resolve
fn conflicts_command(config: &Config) -> Result<()> {
    let store = Loader::new(config).load().context("Failed to load schema fragments")?;
    let session = Session::from_config(store, config)?;
    let conflicts = session.conflicts();

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Name Conflicts".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    if conflicts.is_empty() {
        println!("{}", "✓ No conflicts".green().bold());
        println!();
        println!("{}", "=".repeat(60).bright_blue());
        return Ok(());
    }

    for (i, conflict) in conflicts.iter().enumerate() {
        println!("  {}. {}", i + 1, conflict.to_string().yellow());

        for side in conflict.sides() {
            let references = session.referred_relations(side);
            let mapped = session.can_fix_cross_file_with_mapper(side);

            println!("     {} {}", "-".dimmed(), side.to_string().bold());
            for reference in &references {
                let cross = if reference.model.file != side.file {
                    " (cross-file)".red().to_string()
                } else {
                    String::new()
                };
                println!("         {} {}{}", "referenced by".dimmed(), reference, cross);
            }
            if !mapped.is_empty() {
                println!("         {}", "auto-mapped by [relations]".green());
            }
        }
    }

    println!();
    println!("{} {}", "Total:".bold(), conflicts.len());
    println!("{}", "=".repeat(60).bright_blue());

    Ok(())
}

/// Patch generated artifacts and materialize feature packages
fn patch(config: &Config, report: &mut RunReport, verbose: bool) -> Result<()> {
    if verbose {
        eprintln!("{}", "Patching generated client...".cyan());
    }

    let outcome = build_features(config)?.execute().context("Failed to post-process generated output")?;

    report.summary.blocks_applied = outcome.patches.applied();
    report.summary.blocks_skipped = outcome.patches.skipped();
    report.summary.features_written = outcome.features.written;
    report.summary.features_unchanged = outcome.features.unchanged;

    for diagnostic in outcome.patches.diagnostics() {
        report.add_diagnostic(diagnostic);
    }

    let code = if outcome.features.changed() {
        DiagnosticCode::FeatureWritten
    } else {
        DiagnosticCode::FeatureUnchanged
    };
    report.add_diagnostic(Diagnostic::new(
        code,
        Severity::Info,
        format!(
            "{} packages: {} written, {} unchanged, {} removed",
            outcome.features.packages,
            outcome.features.written,
            outcome.features.unchanged,
            outcome.features.removed
        ),
    ));

    Ok(())
}

/// Run `output.generate_command` against the merged document
fn run_generator(config: &Config, verbose: bool) -> Result<()> {
    let Some(template) = &config.output.generate_command else {
        eprintln!("{}", "No output.generate_command configured, skipping generation".yellow());
        return Ok(());
    };

    let schema = config.resolve_path(&config.output.schema);
    let command = generator_command(template, &schema);

    if verbose {
        eprintln!("{} {}", "Running:".cyan(), command);
    }
    tracing::info!(%command, "running generator");

    let status = shell(&command)
        .current_dir(&config.project_root)
        .status()
        .with_context(|| format!("Failed to run generator command: {}", command))?;

    if !status.success() {
        anyhow::bail!("Generator command exited with {}: {}", status, command);
    }

    Ok(())
}

fn generator_command(template: &str, schema: &Path) -> String {
    template.replace("{schema}", &schema.display().to_string())
}

#[cfg(windows)]
fn shell(command: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("cmd");
    cmd.args(["/C", command]);
    cmd
}

#[cfg(not(windows))]
fn shell(command: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

/// Save and print the report, exiting non-zero on errors
fn finish(report: &RunReport, path: Option<&Path>, title: &str) -> Result<()> {
    if let Some(path) = path {
        report
            .save_to_file(path)
            .with_context(|| format!("Failed to save report to {}", path.display()))?;
        eprintln!("{} {}", "Report saved to:".green(), path.display());
    }

    print_report_summary(report, title);

    if report.has_errors() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_report_summary(report: &RunReport, title: &str) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", title.bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Version: {}", report.version);
    println!("Timestamp: {}", report.timestamp);
    println!();

    let summary = &report.summary;
    println!("{}", "Summary:".bold());
    println!("  Conflicts resolved: {}", summary.conflicts_resolved);
    println!("  Models emitted:     {}", summary.models_emitted);
    println!("  Enums emitted:      {}", summary.enums_emitted);
    println!("  Blocks applied:     {}", summary.blocks_applied);
    println!("  Blocks skipped:     {}", summary.blocks_skipped);
    println!("  Features written:   {}", summary.features_written);
    println!("  Features unchanged: {}", summary.features_unchanged);
    println!();

    if summary.errors > 0 {
        println!("  Errors:   {}", format!("{}", summary.errors).red().bold());
    } else {
        println!("  Errors:   {}", format!("{}", summary.errors).green());
    }

    if summary.warnings > 0 {
        println!("  Warnings: {}", format!("{}", summary.warnings).yellow());
    } else {
        println!("  Warnings: {}", format!("{}", summary.warnings).green());
    }

    println!("  Info:     {}", summary.info);
    println!();

    let notable: Vec<&Diagnostic> = report
        .diagnostics
        .iter()
        .filter(|d| d.severity != Severity::Info)
        .collect();

    if notable.is_empty() {
        println!("{}", "✓ No issues found!".green().bold());
    } else {
        println!("{}", "Diagnostics:".bold());
        for diag in notable {
            let severity_str = match diag.severity {
                Severity::Error => "ERROR".red().bold(),
                Severity::Warn => "WARN".yellow().bold(),
                Severity::Info => "INFO".cyan(),
            };

            println!("  [{}] {}: {}", severity_str, diag.code, diag.message);

            if let Some(loc) = &diag.location {
                println!("    at {}", loc);
            }
        }
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}
