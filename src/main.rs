use std::fs::{read_to_string, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{arg, ArgMatches, Command};
use colored::Colorize;
use eyre::WrapErr;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::auth::{Identity, User};
use crate::config::Config;
use crate::dashboard::{ClassSettings, ClassView, CombinedView};
use crate::error::ValidationError;
use crate::holding::{
    legacy_account_from_str, legacy_history_from_str, normalize_symbol, parse_amount,
    parse_quantity, AssetClass, Holding,
};
use crate::performance::{print_history, print_performance};
use crate::prices::PriceChain;
use crate::snapshot::{record_if_due, SnapshotPolicy};
use crate::store::Store;

mod auth;
mod config;
mod dashboard;
mod error;
mod holding;
mod performance;
mod portfolio;
mod prices;
mod snapshot;
mod store;
mod tui;

const LOG_FILE: &str = "investrack.log";

fn class_arg() -> clap::Arg {
    arg!(<CLASS> "Asset class: crypto or stock")
}

fn cli() -> Command {
    Command::new("investrack")
        .about("Track crypto and stock holdings in your local currency")
        .arg_required_else_help(true)
        .subcommand(Command::new("config").about("Print the path to the config file"))
        .subcommand(
            Command::new("signup")
                .about("Create an account and log in")
                .arg(arg!(<EMAIL> "Account email"))
                .arg(arg!(--password <PASSWORD> "Password, read from stdin when omitted")),
        )
        .subcommand(
            Command::new("login")
                .about("Log in to an existing account")
                .arg(arg!(<EMAIL> "Account email"))
                .arg(arg!(--password <PASSWORD> "Password, read from stdin when omitted")),
        )
        .subcommand(Command::new("logout").about("End the current session"))
        .subcommand(Command::new("whoami").about("Show the logged in account"))
        .subcommand(
            Command::new("holdings")
                .about("List your holdings")
                .arg(arg!([CLASS] "Asset class: crypto or stock (default: both)")),
        )
        .subcommand(
            Command::new("set")
                .about("Add a holding or change its quantity")
                .arg(class_arg())
                .arg(arg!(<SYMBOL> "Ticker symbol, e.g. BTC or AAPL"))
                .arg(arg!(<QUANTITY> "Quantity held").allow_negative_numbers(true)),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove a holding")
                .arg(class_arg())
                .arg(arg!(<SYMBOL> "Ticker symbol")),
        )
        .subcommand(
            Command::new("settings")
                .about("Show or change the exchange rate and invested amount of an asset class")
                .arg(class_arg())
                .arg(arg!(--rate <RATE> "USD to local currency exchange rate").allow_negative_numbers(true))
                .arg(
                    arg!(--invested <AMOUNT> "Total invested, in local currency")
                        .allow_negative_numbers(true),
                ),
        )
        .subcommand(
            Command::new("balances")
                .about("Show the current balances of an asset class")
                .arg(class_arg()),
        )
        .subcommand(
            Command::new("allocation")
                .about("Show the current allocation of an asset class")
                .arg(class_arg()),
        )
        .subcommand(
            Command::new("performance")
                .about("Show all-time, month-to-date and year-to-date performance")
                .arg(class_arg()),
        )
        .subcommand(
            Command::new("history")
                .about("Show daily candles of the recorded portfolio value")
                .arg(class_arg()),
        )
        .subcommand(Command::new("dashboard").about("Show both asset classes and the combined total"))
        .subcommand(
            Command::new("import")
                .about("Import settings, holdings and history from the legacy JSON files")
                .arg(arg!(--crypto <FILE> "Crypto data file (user_data.json)"))
                .arg(arg!(--stock <FILE> "Stock data file (stock_data.json)"))
                .arg(arg!(--history <FILE> "History file with timestamp/value entries"))
                .arg(arg!(--class <CLASS> "Asset class of the history file").default_value("crypto")),
        )
        .subcommand(
            Command::new("tui")
                .about("Launch the interactive terminal dashboard")
                .arg(arg!(--tab <TAB> "Initial tab: overview, crypto or stocks")),
        )
}

fn init_logging(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{}=warn", env!("CARGO_CRATE_NAME")).into());
    let registry = tracing_subscriber::registry().with(filter);

    // the terminal belongs to the dashboard, so its logs go to a file
    match log_file.and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok()) {
        Some(file) => registry
            .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
            .init(),
        None => registry.with(fmt::layer().with_writer(io::stderr)).init(),
    }
}

fn parse_class(matches: &ArgMatches, id: &str) -> Result<AssetClass, ValidationError> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .unwrap_or_default()
        .parse()
}

fn read_password(matches: &ArgMatches) -> eyre::Result<String> {
    if let Some(password) = matches.get_one::<String>("password") {
        return Ok(password.clone());
    }
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Everything a command needs once the config is loaded.
struct Context {
    cfg: Config,
    store: Store,
    policy: SnapshotPolicy,
}

impl Context {
    fn require_user(&self) -> eyre::Result<User> {
        Ok(Identity::new(&self.store).require_user()?)
    }

    async fn render(&self, user: &User, class: AssetClass) -> ClassView {
        let chain = PriceChain::for_class(class, &self.cfg);
        let view = ClassView::render(&self.store, &chain, self.policy, &user.id, class, Utc::now()).await;
        view.print_warnings();
        view
    }
}

fn print_holdings(store: &Store, user: &User, class: AssetClass) -> eyre::Result<()> {
    let holdings = store.holdings(&user.id, class)?;
    println!("{}", class.title().bold());
    if holdings.is_empty() {
        println!("  (none)");
    }
    for holding in holdings {
        println!("{: >12} | {}", holding.get_symbol(), holding.get_quantity());
    }
    Ok(())
}

fn print_settings(currency: &str, class: AssetClass, settings: &ClassSettings) {
    println!("{} settings", class.title());
    println!("  Exchange rate (USD -> {currency}): {}", settings.rate);
    println!("  Total invested ({currency}):       {:.2}", settings.invested);
}

fn import_legacy(ctx: &Context, user: &User, matches: &ArgMatches) -> eyre::Result<()> {
    let mut imported = false;

    for (flag, class) in [("crypto", AssetClass::Crypto), ("stock", AssetClass::Stock)] {
        let Some(file) = matches.get_one::<String>(flag) else {
            continue;
        };
        let data = read_to_string(file).wrap_err_with(|| format!("Error reading file: {file}"))?;
        let account = legacy_account_from_str(class, &data)
            .wrap_err_with(|| format!("{file} is not a valid {class} data file"))?;

        let settings = ClassSettings::default()
            .with_rate(account.rate)?
            .with_invested(account.invested)?;
        settings.save(&ctx.store, &user.id, class)?;
        ctx.store.replace_holdings(&user.id, class, &account.holdings)?;
        println!(
            "Imported {} {class} holdings (rate {}, invested {:.2})",
            account.holdings.len(),
            settings.rate,
            settings.invested
        );
        imported = true;
    }

    if let Some(file) = matches.get_one::<String>("history") {
        let class = parse_class(matches, "class")?;
        let data = read_to_string(file).wrap_err_with(|| format!("Error reading file: {file}"))?;
        let points = legacy_history_from_str(&data)
            .wrap_err_with(|| format!("{file} is not a valid history file"))?;

        let mut recorded = 0;
        for (timestamp, value) in &points {
            if record_if_due(&ctx.store, ctx.policy, &user.id, class, *value, *timestamp)?.was_recorded() {
                recorded += 1;
            }
        }
        println!(
            "Imported {recorded} of {} {class} history entries ({} already covered)",
            points.len(),
            points.len() - recorded
        );
        imported = true;
    }

    if !imported {
        println!("Nothing to import, pass --crypto, --stock or --history");
    }
    Ok(())
}

async fn run(matches: ArgMatches) -> eyre::Result<()> {
    if matches.subcommand_matches("config").is_some() {
        let path = Config::file_path()?;
        println!("Your config file is located here: \n{}", path.display());
        return Ok(());
    }

    let cfg = Config::load().wrap_err("Could not load the config file")?;
    let policy = cfg.snapshot_policy()?;
    let db_path: PathBuf = cfg.database_path()?;
    let log_file = matches
        .subcommand_matches("tui")
        .map(|_| db_path.parent().unwrap_or(Path::new(".")).join(LOG_FILE));
    init_logging(log_file.as_deref());

    let store = Store::open(&db_path)
        .wrap_err_with(|| format!("Could not open the database at {}", db_path.display()))?;
    info!(path = %db_path.display(), "database opened");
    let ctx = Context { cfg, store, policy };
    let currency = ctx.cfg.currency.clone();

    match matches.subcommand() {
        Some(("signup", sub)) => {
            let email = sub.get_one::<String>("EMAIL").map(String::as_str).unwrap_or_default();
            let password = read_password(sub)?;
            let identity = Identity::new(&ctx.store);
            let user = identity.sign_up(email, &password)?;
            identity.sign_in(email, &password)?;
            println!("Account created, logged in as {}", user.email);
        }
        Some(("login", sub)) => {
            let email = sub.get_one::<String>("EMAIL").map(String::as_str).unwrap_or_default();
            let password = read_password(sub)?;
            let user = Identity::new(&ctx.store).sign_in(email, &password)?;
            println!("Logged in as {}", user.email);
        }
        Some(("logout", _)) => {
            Identity::new(&ctx.store).sign_out()?;
            println!("Logged out");
        }
        Some(("whoami", _)) => match Identity::new(&ctx.store).current_user() {
            Some(user) => println!("{}", user.email),
            None => println!("Not logged in"),
        },
        Some(("holdings", sub)) => {
            let user = ctx.require_user()?;
            let classes = match sub.get_one::<String>("CLASS") {
                Some(class) => vec![class.parse::<AssetClass>()?],
                None => AssetClass::all().to_vec(),
            };
            for class in classes {
                print_holdings(&ctx.store, &user, class)?;
            }
        }
        Some(("set", sub)) => {
            let user = ctx.require_user()?;
            let class = parse_class(sub, "CLASS")?;
            let symbol = sub.get_one::<String>("SYMBOL").map(String::as_str).unwrap_or_default();
            let quantity = parse_quantity(
                sub.get_one::<String>("QUANTITY").map(String::as_str).unwrap_or_default(),
            )?;
            let holding = Holding::new(symbol, quantity)?;
            ctx.store.upsert_holding(&user.id, class, &holding)?;
            println!("Saved {} {} ({class})", holding.get_quantity(), holding.get_symbol());
        }
        Some(("remove", sub)) => {
            let user = ctx.require_user()?;
            let class = parse_class(sub, "CLASS")?;
            let symbol = normalize_symbol(
                sub.get_one::<String>("SYMBOL").map(String::as_str).unwrap_or_default(),
            )?;
            if ctx.store.remove_holding(&user.id, class, &symbol)? {
                println!("Removed {symbol} ({class})");
            } else {
                println!("No {class} holding named {symbol}");
            }
        }
        Some(("settings", sub)) => {
            let user = ctx.require_user()?;
            let class = parse_class(sub, "CLASS")?;
            let mut settings = ClassSettings::load(&ctx.store, &user.id, class)?;
            let rate = sub.get_one::<String>("rate");
            let invested = sub.get_one::<String>("invested");
            if let Some(rate) = rate {
                settings = settings.with_rate(parse_amount(rate)?)?;
            }
            if let Some(invested) = invested {
                settings = settings.with_invested(parse_amount(invested)?)?;
            }
            if rate.is_some() || invested.is_some() {
                settings.save(&ctx.store, &user.id, class)?;
                println!("Settings saved.");
            }
            print_settings(&currency, class, &settings);
        }
        Some(("balances", sub)) => {
            let user = ctx.require_user()?;
            let view = ctx.render(&user, parse_class(sub, "CLASS")?).await;
            view.valuation.print(&currency, true);
            view.summary.print(&currency);
        }
        Some(("allocation", sub)) => {
            let user = ctx.require_user()?;
            let view = ctx.render(&user, parse_class(sub, "CLASS")?).await;
            view.valuation.draw_pie_chart();
            view.valuation.print_allocation();
        }
        Some(("performance", sub)) => {
            let user = ctx.require_user()?;
            let view = ctx.render(&user, parse_class(sub, "CLASS")?).await;
            view.summary.print(&currency);
            print_performance(
                &currency,
                view.summary.total_value,
                &view.mtd,
                &view.ytd,
                &view.history,
            );
        }
        Some(("history", sub)) => {
            let user = ctx.require_user()?;
            let class = parse_class(sub, "CLASS")?;
            let history = ctx.store.history(&user.id, class)?;
            if history.is_empty() {
                println!("No {class} history recorded yet.");
            } else {
                print_history(&currency, &history);
            }
        }
        Some(("dashboard", _)) => {
            let user = ctx.require_user()?;
            let mut views = Vec::new();
            for class in AssetClass::all() {
                let view = ctx.render(&user, class).await;
                println!("{}", class.title().bold());
                view.valuation.print(&currency, true);
                views.push(view);
            }
            CombinedView::from_views(&views).print(&currency, &views);
            CombinedView::draw_class_pie_chart(&views);
        }
        Some(("import", sub)) => {
            let user = ctx.require_user()?;
            import_legacy(&ctx, &user, sub)?;
        }
        Some(("tui", sub)) => {
            let user = ctx.require_user()?;
            let tab = match sub.get_one::<String>("tab") {
                Some(name) => Some(
                    tui::Tab::from_name(name)
                        .ok_or_else(|| eyre::eyre!("Unknown tab '{name}', expected overview, crypto or stocks"))?,
                ),
                None => None,
            };
            tui::run_tui(ctx.cfg, ctx.store, ctx.policy, user, tab).await?;
        }
        _ => {
            cli().print_help()?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let matches = cli().get_matches();
    if let Err(e) = run(matches).await {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli() {
        let matches = cli().get_matches_from(vec!["investrack", "balances", "crypto"]);
        assert_eq!(matches.subcommand_name(), Some("balances"));
        let sub = matches.subcommand_matches("balances").unwrap();
        assert_eq!(parse_class(sub, "CLASS").unwrap(), AssetClass::Crypto);
    }

    #[test]
    fn test_cli_set_accepts_negative_quantity_for_validation() {
        let matches = cli().get_matches_from(vec!["investrack", "set", "stocks", "aapl", "-3"]);
        let sub = matches.subcommand_matches("set").unwrap();
        assert_eq!(parse_class(sub, "CLASS").unwrap(), AssetClass::Stock);
        let quantity = sub.get_one::<String>("QUANTITY").unwrap();
        assert!(matches!(
            parse_quantity(quantity),
            Err(ValidationError::NegativeQuantity(_))
        ));
    }

    #[test]
    fn test_cli_settings_flags() {
        let matches = cli().get_matches_from(vec![
            "investrack",
            "settings",
            "crypto",
            "--rate",
            "15.1",
            "--invested",
            "2000",
        ]);
        let sub = matches.subcommand_matches("settings").unwrap();
        assert_eq!(sub.get_one::<String>("rate").unwrap(), "15.1");
        assert_eq!(sub.get_one::<String>("invested").unwrap(), "2000");
    }

    #[test]
    fn test_cli_rejects_unknown_class() {
        let matches = cli().get_matches_from(vec!["investrack", "performance", "bonds"]);
        let sub = matches.subcommand_matches("performance").unwrap();
        assert!(matches!(
            parse_class(sub, "CLASS"),
            Err(ValidationError::UnknownAssetClass(_))
        ));
    }

    #[test]
    fn test_import_legacy_files() {
        let dir = tempfile::tempdir().unwrap();
        let crypto = dir.path().join("user_data.json");
        std::fs::write(
            &crypto,
            r#"{"crypto_rate": 15.0, "crypto_investment": 500, "crypto_holdings": {"btc": "0.1", "eth": 2}}"#,
        )
        .unwrap();
        let history = dir.path().join("history.json");
        std::fs::write(
            &history,
            r#"[{"timestamp": "2025-01-01", "value_ghs": 100.0},
                {"timestamp": "2025-01-01T18:00:00", "value_ghs": 110.0},
                {"timestamp": "2025-01-02", "value_ghs": 120.0}]"#,
        )
        .unwrap();

        let ctx = Context {
            cfg: Config::default(),
            store: Store::temporary(),
            policy: SnapshotPolicy::Daily,
        };
        let user = User {
            id: "u1".to_string(),
            email: "a@b.c".to_string(),
        };
        let matches = cli().get_matches_from(vec![
            "investrack".to_string(),
            "import".to_string(),
            "--crypto".to_string(),
            crypto.to_string_lossy().to_string(),
            "--history".to_string(),
            history.to_string_lossy().to_string(),
        ]);
        import_legacy(&ctx, &user, matches.subcommand_matches("import").unwrap()).unwrap();

        let holdings = ctx.store.holdings("u1", AssetClass::Crypto).unwrap();
        assert_eq!(holdings.len(), 2);
        let settings = ClassSettings::load(&ctx.store, "u1", AssetClass::Crypto).unwrap();
        assert_eq!(settings, ClassSettings { rate: 15.0, invested: 500.0 });

        let recorded = ctx.store.history("u1", AssetClass::Crypto).unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].value, 100.0);
    }
}
