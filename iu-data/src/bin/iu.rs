use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use iu_core::calculations::common::{format_clp, format_factor, format_percentage};
use iu_core::calculations::{
    ApvCalculator, ComparisonRow, DEFAULT_MILESTONES, Regime, RegimeBenefit, compute_tax,
    compute_tax_range, table_statistics, validate_structure,
};
use iu_core::{
    BracketAdmin, BracketStore, BracketTable, ReferenceDataProvider, ReferenceParameters,
};
use iu_data::{BracketTableLoader, DirectoryStore, init_logging, parse_amount, sync_directory};
use iu_db_sqlite::SqliteStore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Chilean monthly income tax (Impuesto Único) and APV regime calculator.
///
/// Reference data is read from a data directory laid out as
/// `tramos/sii-YYYY-MM.json` (bracket tables) and `YYYY/YYYY-MM.json`
/// (UF and UTM values), or from a SQLite database when `--database` is
/// given. Missing data falls back to the embedded 2025 table.
#[derive(Parser, Debug)]
#[command(name = "iu")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding reference data and stored bracket tables
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// SQLite database URL used instead of the data directory
    /// (e.g., sqlite:iu.db?mode=rwc to create if missing)
    #[arg(long, global = true)]
    database: Option<String>,

    /// TOML file with reference parameters (rentabilidadAnual, valorUF, ...)
    #[arg(long, global = true)]
    params: Option<PathBuf>,

    /// Date whose period selects the reference data (defaults to today)
    #[arg(long, global = true)]
    date: Option<NaiveDate>,

    /// Log level or filter directive; RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Also append log records to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monthly tax for a taxable income
    Tax {
        #[arg(value_parser = parse_amount)]
        income: Decimal,
    },

    /// Tax sampled over an income range
    Range {
        #[arg(value_parser = parse_amount)]
        from: Decimal,
        #[arg(value_parser = parse_amount)]
        to: Decimal,
        #[arg(value_parser = parse_amount)]
        step: Decimal,
    },

    /// Check a bracket table file, or the active table when no file is given
    Validate { file: Option<PathBuf> },

    /// Compare the APV regimes for a liquid income and monthly contribution
    Compare {
        #[arg(value_parser = parse_amount)]
        income: Decimal,
        #[arg(value_parser = parse_amount)]
        contribution: Decimal,
    },

    /// Project accumulated savings under a regime
    Project {
        #[arg(value_parser = parse_amount)]
        income: Decimal,
        #[arg(value_parser = parse_amount)]
        contribution: Decimal,
        /// Regime to project (defaults to the recommended one)
        #[arg(long, value_enum)]
        regime: Option<RegimeArg>,
        /// Horizons in years, comma separated
        #[arg(long, value_delimiter = ',')]
        years: Vec<u32>,
    },

    /// Monthly figures with and without the contribution
    Table {
        #[arg(value_parser = parse_amount)]
        income: Decimal,
        #[arg(value_parser = parse_amount)]
        contribution: Decimal,
        #[arg(long, value_enum, default_value_t = RegimeArg::B)]
        regime: RegimeArg,
    },

    /// Load bracket tables from a CSV file into the data directory or database
    ImportCsv {
        file: PathBuf,
        /// Parse and validate without storing
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Periods with a stored bracket table, newest first
    Periods,

    /// Active bracket table with summary statistics
    Brackets,

    /// Copy tables and unit values from the data directory into the database
    Sync,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RegimeArg {
    A,
    B,
}

impl From<RegimeArg> for Regime {
    fn from(arg: RegimeArg) -> Self {
        match arg {
            RegimeArg::A => Regime::A,
            RegimeArg::B => Regime::B,
        }
    }
}

/// Accepts a full bracket document or a bare `tramos` array.
#[derive(Deserialize)]
#[serde(untagged)]
enum TableInput {
    Document { tramos: BracketTable },
    Table(BracketTable),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_file.as_deref())?;

    let directory = DirectoryStore::new(&cli.data_dir);
    let Some(url) = &cli.database else {
        if matches!(cli.command, Command::Sync) {
            bail!("sync requires --database");
        }
        return run(&cli, directory).await;
    };

    let database = SqliteStore::new(url)
        .await
        .with_context(|| format!("Failed to connect to database: {url}"))?;
    database
        .run_migrations()
        .await
        .context("Failed to run database migrations")?;

    if matches!(cli.command, Command::Sync) {
        let summary = sync_directory(&directory, &database)
            .await
            .context("Failed to copy the data directory into the database")?;
        if cli.json {
            return print_json(&summary);
        }
        println!(
            "Copied {} bracket table(s) and {} unit value set(s); skipped {} invalid table(s).",
            summary.tables, summary.unit_values, summary.skipped_tables
        );
        return Ok(());
    }
    run(&cli, database).await
}

async fn run<S>(
    cli: &Cli,
    store: S,
) -> Result<()>
where
    S: BracketStore + ReferenceDataProvider,
{
    let today = cli.date.unwrap_or_else(|| Local::now().date_naive());
    debug!(date = %today, "Using reference data for date");

    match &cli.command {
        Command::Tax { income } => {
            let calculator = calculator(&store, today, cli.params.as_deref()).await?;
            let result = compute_tax(*income, calculator.bracket_table())?;
            if cli.json {
                return print_json(&result);
            }
            println!("Renta imponible:  {}", format_clp(result.income));
            println!(
                "Tramo:            {} (factor {}, rebaja {})",
                result.applied_bracket_index + 1,
                format_factor(result.marginal_rate),
                format_clp(result.deduction)
            );
            println!("Impuesto:         {}", format_clp(result.tax));
            println!("Tasa efectiva:    {}", result.effective_rate_percentage());
        }

        Command::Range { from, to, step } => {
            let calculator = calculator(&store, today, cli.params.as_deref()).await?;
            let range = compute_tax_range(*from, *to, *step, calculator.bracket_table())?;
            if cli.json {
                return print_json(&range.iter().collect::<Vec<_>>());
            }
            println!("{:>15} {:>6} {:>13} {:>8}", "Renta", "Tramo", "Impuesto", "Tasa");
            for result in &range {
                println!(
                    "{:>15} {:>6} {:>13} {:>8}",
                    format_clp(result.income),
                    result.applied_bracket_index + 1,
                    format_clp(result.tax),
                    result.effective_rate_percentage()
                );
            }
        }

        Command::Validate { file } => {
            let table = match file {
                Some(path) => read_table(path)?,
                None => calculator(&store, today, cli.params.as_deref())
                    .await?
                    .bracket_table()
                    .clone(),
            };
            let violations = validate_structure(&table);
            if cli.json {
                print_json(&violations)?;
            } else if violations.is_empty() {
                println!("Tabla válida: {} tramos.", table.len());
            } else {
                for violation in &violations {
                    println!("{violation}");
                }
            }
            if !violations.is_empty() {
                bail!("bracket table has {} violation(s)", violations.len());
            }
        }

        Command::Compare {
            income,
            contribution,
        } => {
            let calculator = calculator(&store, today, cli.params.as_deref()).await?;
            let comparison = calculator.compare_regimes(*income, *contribution)?;
            if cli.json {
                return print_json(&comparison);
            }
            print_benefit(&comparison.regime_a);
            print_benefit(&comparison.regime_b);
            println!();
            println!(
                "Recomendación: {} (diferencia {} anuales)",
                comparison.recommendation.label(),
                format_clp(comparison.difference)
            );
            println!("{}", comparison.explanation);
            println!("Datos: {:?}", comparison.provenance);
        }

        Command::Project {
            income,
            contribution,
            regime,
            years,
        } => {
            let calculator = calculator(&store, today, cli.params.as_deref()).await?;
            let comparison = calculator.compare_regimes(*income, *contribution)?;
            let regime = regime.map_or(comparison.recommendation, Regime::from);
            let benefit = match regime {
                Regime::A => &comparison.regime_a,
                Regime::B => &comparison.regime_b,
            };
            let milestones = if years.is_empty() {
                DEFAULT_MILESTONES.to_vec()
            } else {
                years.clone()
            };
            let projections = calculator.project_milestones(benefit, &milestones)?;
            if cli.json {
                return print_json(&projections);
            }
            println!(
                "{} con rentabilidad anual {}",
                regime.label(),
                format_percentage(calculator.parameters().annual_return_rate)
            );
            println!(
                "{:>5} {:>15} {:>15} {:>15} {:>15}",
                "Años", "Capital", "Aportes", "Beneficio", "Rentabilidad"
            );
            for projection in &projections {
                println!(
                    "{:>5} {:>15} {:>15} {:>15} {:>15}",
                    projection.years,
                    format_clp(projection.capital),
                    format_clp(projection.contributions),
                    format_clp(projection.benefit_accumulated),
                    format_clp(projection.return_generated)
                );
            }
        }

        Command::Table {
            income,
            contribution,
            regime,
        } => {
            let calculator = calculator(&store, today, cli.params.as_deref()).await?;
            let table =
                calculator.generate_comparison_table(*income, *contribution, (*regime).into())?;
            if cli.json {
                return print_json(&table);
            }
            println!("{}", table.regime.label());
            println!("{:<22} {:>15} {:>15}", "", "Sin APV", "Con APV");
            print_rows(&table.without_apv, &table.with_apv);
        }

        Command::ImportCsv { file, dry_run } => {
            let reader =
                File::open(file).with_context(|| format!("Failed to open: {}", file.display()))?;
            let records = BracketTableLoader::parse(reader)
                .with_context(|| format!("Failed to parse CSV: {}", file.display()))?;
            let tables = BracketTableLoader::tables(&records)
                .with_context(|| format!("Invalid bracket data in: {}", file.display()))?;

            if *dry_run {
                for table in &tables {
                    println!("{} ({} tramos)", table.period.label(), table.table.len());
                }
                println!("{} table(s) would be stored.", tables.len());
                return Ok(());
            }

            let admin = BracketAdmin::new(store);
            let stored = BracketTableLoader::load(&admin, tables)
                .await
                .context("Failed to store bracket tables")?;
            println!("Stored {stored} bracket table(s).");
        }

        Command::Periods => {
            let admin = BracketAdmin::new(store);
            let periods = admin.saved_periods().await?;
            if cli.json {
                let keys: Vec<String> = periods.iter().map(|p| p.to_string()).collect();
                return print_json(&keys);
            }
            if periods.is_empty() {
                println!("No stored bracket tables.");
            }
            for period in periods {
                println!("{period}  {}", period.label());
            }
        }

        Command::Brackets => {
            let calculator = calculator(&store, today, cli.params.as_deref()).await?;
            let table = calculator.bracket_table();
            let brackets: Vec<_> = (0..table.len())
                .filter_map(|position| table.bracket_info(position))
                .collect();
            let statistics = table_statistics(table)?;

            if cli.json {
                #[derive(Serialize)]
                struct Brackets<T, S> {
                    brackets: T,
                    statistics: S,
                }
                return print_json(&Brackets {
                    brackets,
                    statistics,
                });
            }
            println!(
                "{:<9} {:>15} {:>15} {:>8} {:>13} {:>14}",
                "", "Desde", "Hasta", "Factor", "Rebaja", "Tasa máx."
            );
            for info in &brackets {
                println!(
                    "{:<9} {:>15} {:>15} {:>8} {:>13} {:>14}",
                    info.label,
                    info.lower_formatted,
                    info.upper_formatted,
                    info.rate_formatted,
                    info.deduction_formatted,
                    info.max_effective_rate_formatted
                );
            }
            println!();
            println!(
                "{} tramos, factor máximo {}, rebaja máxima {}. Datos: {:?}",
                statistics.bracket_count,
                format_factor(statistics.highest_rate),
                format_clp(statistics.highest_deduction),
                calculator.provenance()
            );
        }

        Command::Sync => bail!("sync requires --database"),
    }

    Ok(())
}

/// Calculator for the period containing `today`, with parameters from
/// `params` replacing the loaded ones when given.
async fn calculator<P: ReferenceDataProvider>(
    provider: &P,
    today: NaiveDate,
    params: Option<&Path>,
) -> Result<ApvCalculator> {
    let mut calculator = ApvCalculator::initialize(provider, today).await;
    if let Some(path) = params {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameters: {}", path.display()))?;
        let parameters: ReferenceParameters = toml::from_str(&text)
            .with_context(|| format!("Failed to parse parameters: {}", path.display()))?;
        calculator
            .set_parameters(parameters)
            .with_context(|| format!("Rejected parameters: {}", path.display()))?;
    }
    Ok(calculator)
}

fn read_table(path: &Path) -> Result<BracketTable> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read: {}", path.display()))?;
    let input: TableInput = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse bracket table: {}", path.display()))?;
    Ok(match input {
        TableInput::Document { tramos } => tramos,
        TableInput::Table(table) => table,
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_benefit(benefit: &RegimeBenefit) {
    println!("{}", benefit.regime.label());
    if let Some(bonus) = benefit.bonus() {
        println!("  Bonificación mensual:   {}", format_clp(bonus.monthly_bonus));
        println!("  Bonificación anual:     {}", format_clp(bonus.annual_bonus));
        println!("  Tope anual:             {}", format_clp(bonus.bonus_cap));
        if bonus.excess_contribution > Decimal::ZERO {
            println!(
                "  Aporte sobre el tope:   {}",
                format_clp(bonus.excess_contribution)
            );
        }
    }
    if let Some(deduction) = benefit.deduction() {
        println!(
            "  Base imponible:         {}",
            format_clp(deduction.taxable_base)
        );
        println!(
            "  Impuesto sin/con APV:   {} / {}",
            format_clp(deduction.tax_without_apv),
            format_clp(deduction.tax_with_apv)
        );
        println!(
            "  Ahorro mensual:         {}",
            format_clp(deduction.monthly_saving)
        );
        println!(
            "  Ahorro anual:           {}",
            format_clp(deduction.annual_saving)
        );
    }
}

fn print_rows(
    without: &ComparisonRow,
    with: &ComparisonRow,
) {
    let rows = [
        ("Ahorro mensual", without.monthly_saving, with.monthly_saving),
        ("Sueldo imponible", without.taxable_salary, with.taxable_salary),
        ("Impuesto a pagar", without.tax_payable, with.tax_payable),
        ("Ahorro en impuesto", without.tax_saving, with.tax_saving),
        ("Bonificación fiscal", without.fiscal_bonus, with.fiscal_bonus),
    ];
    for (label, before, after) in rows {
        println!(
            "{label:<22} {:>15} {:>15}",
            format_clp(before),
            format_clp(after)
        );
    }
}
