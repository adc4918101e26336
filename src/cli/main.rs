use clap::{Parser, Subcommand};
use google_oauth2_server::config::ServerConfig;
use google_oauth2_server::{
    start_api_service, ApiKey, AppState, EdgarClient, FormType, GoogleOauth, GoogleOauth2Server,
    KeyStore,
};
use indicatif::ProgressBar;
use std::process::exit;
use std::time::Duration;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// disable logging
    #[clap(long, global = true)]
    no_log: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the login portal and the filings API
    Serve {
        /// host address
        #[clap(short = 'h', long, default_value = "0.0.0.0")]
        host: String,

        /// port number
        #[clap(short = 'p', long, default_value = "8000")]
        port: u16,

        /// key store sqlite file location, overriding GOOGLE_OAUTH2_SERVER_DB_PATH
        #[clap(long)]
        db_path: Option<String>,

        /// sweep interval in seconds, default from GOOGLE_OAUTH2_SERVER_SWEEP_INTERVAL_SECS
        #[clap(short = 'i', long, value_parser = min_sweep_interval_check)]
        sweep_interval: Option<u64>,

        /// disable the background expired-key sweep
        #[clap(long)]
        no_sweep: bool,
    },

    /// Manage API keys in the local key store
    #[clap(subcommand)]
    Key(KeyCommands),

    /// Fetch the latest filing of a company as plain text
    Fetch {
        /// stock ticker symbol, e.g. AAPL
        ticker: String,

        /// form type to look up
        #[clap(short, long, default_value = "10-K")]
        form: String,

        /// chunk cursor to print
        #[clap(short, long, default_value = "0")]
        cursor: u64,

        /// fetch every form's latest filing and print a summary listing
        #[clap(short, long)]
        all: bool,

        /// contact identification forwarded to SEC EDGAR, must contain an email
        #[clap(short, long)]
        user_agent: String,

        /// query a running server at this URL instead of EDGAR directly
        #[clap(long)]
        url: Option<String>,

        /// API key for the remote server
        #[clap(long)]
        api_key: Option<String>,

        /// print the full response in JSON format instead of the chunk text
        #[clap(short, long)]
        json: bool,
    },

    /// Check whether a running server is healthy
    Ping {
        /// server URL
        #[clap(short, long)]
        url: Option<String>,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Mint a new API key and print the raw token
    Create {
        /// service label for the key, unique per store
        service: String,

        /// key lifetime, e.g. "30d" or "12 weeks"
        #[clap(short, long, value_parser = humantime::parse_duration)]
        ttl: Option<Duration>,

        /// print the raw key and the stored record in JSON format
        #[clap(short, long)]
        json: bool,
    },

    /// List stored keys
    List {
        /// print keys in JSON format instead of Markdown table
        #[clap(short, long)]
        json: bool,
    },

    /// Revoke a key by its hash
    Revoke {
        /// key hash as shown by `key list`
        hash: String,
    },

    /// Delete expired keys from the store
    Purge,
}

#[derive(Tabled)]
struct FilingSummaryRow {
    form: String,
    accession: String,
    report_date: String,
    document: String,
    pages: usize,
}

#[derive(Tabled)]
struct KeyTableRow {
    hash: String,
    service: String,
    created: String,
    expires: String,
    revoked: bool,
}

impl From<&ApiKey> for KeyTableRow {
    fn from(key: &ApiKey) -> Self {
        KeyTableRow {
            hash: key.hash.clone(),
            service: key.service.clone(),
            created: key.created_time().format("%Y-%m-%d %H:%M:%S").to_string(),
            expires: key.expires_time().format("%Y-%m-%d %H:%M:%S").to_string(),
            revoked: key.revoked,
        }
    }
}

fn min_sweep_interval_check(s: &str) -> Result<u64, String> {
    let v = s.parse::<u64>().map_err(|e| e.to_string())?;
    if v < 60 {
        Err("sweep interval should be at least 60 seconds".to_string())
    } else {
        Ok(v)
    }
}

fn get_tokio_runtime() -> Runtime {
    let blocking_cpus = num_cpus::get();

    debug!("using {} cores for blocking tasks", blocking_cpus);
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(blocking_cpus)
        .build()
        .unwrap();
    rt
}

fn enable_logging() {
    tracing_subscriber::fmt()
        .with_ansi(true)
        .with_level(true)
        .with_target(false)
        .init();
}

async fn open_keystore(config: &ServerConfig, hash_secret: &str) -> KeyStore {
    match KeyStore::new(&config.keystore.db_path, hash_secret).await {
        Ok(store) => store,
        Err(e) => {
            error!(
                "failed to open key store at {}: {}",
                config.keystore.db_path, e
            );
            exit(1);
        }
    }
}

fn require_hash_secret(config: &ServerConfig) -> String {
    match config.keystore.hash_secret.clone() {
        Some(secret) => secret,
        None => {
            error!("API_KEY_HASH_SECRET environment variable is not set");
            exit(1);
        }
    }
}

fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let do_log = !cli.no_log;

    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "google_oauth2_server=info,axum=info");
    }

    match cli.command {
        Commands::Serve {
            host,
            port,
            db_path,
            sweep_interval,
            no_sweep,
        } => {
            if do_log {
                enable_logging();
            }

            let mut config = ServerConfig::from_env();
            if let Some(path) = db_path {
                config.keystore.db_path = path;
            }
            let hash_secret = require_hash_secret(&config);

            let do_sweep = !no_sweep;
            let sweep_interval = sweep_interval.unwrap_or(config.sweep.interval_secs);

            let rt = get_tokio_runtime();
            rt.block_on(async {
                let keystore = open_keystore(&config, &hash_secret).await;

                let oauth = match (&config.oauth.client_id, &config.oauth.client_secret) {
                    (Some(client_id), Some(client_secret)) => {
                        match GoogleOauth::discover(
                            client_id,
                            client_secret,
                            config.edgar.max_retries,
                            config.edgar.backoff_ms,
                        )
                        .await
                        {
                            Ok(oauth) => Some(oauth),
                            Err(e) => {
                                error!("Google discovery failed: {}", e);
                                exit(1);
                            }
                        }
                    }
                    _ => {
                        warn!("GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET not set, login disabled");
                        None
                    }
                };

                let edgar = match EdgarClient::new(&config.edgar) {
                    Ok(client) => client,
                    Err(e) => {
                        error!("failed to build EDGAR client: {}", e);
                        exit(1);
                    }
                };

                for line in config.display_summary(do_sweep, sweep_interval, &host, port) {
                    info!("{}", line);
                }

                if do_sweep {
                    // starting a dedicated task to periodically delete expired keys
                    let store = keystore.clone();
                    tokio::spawn(async move {
                        let mut interval =
                            tokio::time::interval(Duration::from_secs(sweep_interval));
                        loop {
                            interval.tick().await;
                            match store.purge_expired().await {
                                Ok(0) => debug!("sweep found no expired keys"),
                                Ok(count) => info!("sweep deleted {} expired keys", count),
                                Err(e) => error!("sweep failed: {}", e),
                            }
                        }
                    });
                }

                let state = AppState::new(&config, keystore, oauth, edgar);
                if let Err(e) = start_api_service(state, &host, port).await {
                    error!("API service exited: {}", e);
                    exit(1);
                }
            });
        }
        Commands::Key(key_command) => {
            if do_log {
                enable_logging();
            }

            let config = ServerConfig::from_env();
            let hash_secret = require_hash_secret(&config);

            let rt = get_tokio_runtime();
            rt.block_on(async {
                let keystore = open_keystore(&config, &hash_secret).await;

                match key_command {
                    KeyCommands::Create { service, ttl, json } => {
                        let ttl = ttl.unwrap_or_else(|| config.keystore.default_ttl());
                        match keystore.mint(&service, ttl).await {
                            Ok((raw_key, record)) => {
                                if json {
                                    let payload = serde_json::json!({
                                        "key": raw_key,
                                        "record": record,
                                    });
                                    println!("{}", serde_json::to_string_pretty(&payload).unwrap());
                                } else {
                                    info!(
                                        "minted key for service '{}', expires {} UTC",
                                        record.service,
                                        record.expires_time()
                                    );
                                    println!("{}", raw_key);
                                }
                            }
                            Err(e) => {
                                error!("failed to mint key: {}", e);
                                exit(1);
                            }
                        }
                    }
                    KeyCommands::List { json } => {
                        let keys = match keystore.list().await {
                            Ok(keys) => keys,
                            Err(e) => {
                                error!("failed to list keys: {}", e);
                                exit(1);
                            }
                        };
                        if json {
                            println!("{}", serde_json::to_string_pretty(&keys).unwrap());
                        } else {
                            let rows = keys.iter().map(KeyTableRow::from).collect::<Vec<_>>();
                            println!("{}", Table::new(rows).with(Style::markdown()));
                        }
                    }
                    KeyCommands::Revoke { hash } => match keystore.revoke(&hash).await {
                        Ok(true) => info!("revoked key {}", hash),
                        Ok(false) => {
                            error!("no key found with hash {}", hash);
                            exit(1);
                        }
                        Err(e) => {
                            error!("failed to revoke key: {}", e);
                            exit(1);
                        }
                    },
                    KeyCommands::Purge => match keystore.purge_expired().await {
                        Ok(count) => println!("deleted {} expired keys", count),
                        Err(e) => {
                            error!("failed to purge keys: {}", e);
                            exit(1);
                        }
                    },
                }
            });
        }
        Commands::Fetch {
            ticker,
            form,
            cursor,
            all,
            user_agent,
            url,
            api_key,
            json,
        } => {
            if do_log {
                enable_logging();
            }

            if all && url.is_some() {
                error!("--all fetches straight from EDGAR and cannot be combined with --url");
                exit(1);
            }

            if let Some(url) = url {
                // remote mode: go through a running server with the client SDK
                let mut client = GoogleOauth2Server::new()
                    .server_url(url)
                    .ticker(ticker)
                    .form(form)
                    .cursor(cursor)
                    .user_agent(user_agent);
                if let Some(api_key) = api_key {
                    client = client.api_key(api_key);
                }

                // health check first
                if client.health_check().is_err() {
                    println!("server instance at {} is not available", client.server_url);
                    exit(1);
                }

                let page = match client.latest_filing() {
                    Ok(page) => page,
                    Err(e) => {
                        error!("fetch failed: {}", e);
                        exit(1);
                    }
                };

                if json {
                    println!("{}", serde_json::to_string_pretty(&page).unwrap());
                } else {
                    println!("{}", page.chunk(cursor).unwrap_or_default());
                }
                return;
            }

            // local mode: query EDGAR directly, no server needed
            let config = ServerConfig::from_env();
            let edgar = match EdgarClient::new(&config.edgar) {
                Ok(client) => client,
                Err(e) => {
                    error!("failed to build EDGAR client: {}", e);
                    exit(1);
                }
            };

            if all {
                let rt = get_tokio_runtime();
                rt.block_on(async {
                    let spinner = ProgressBar::new_spinner();
                    spinner.set_message(format!("fetching latest filings for {}", ticker));
                    spinner.enable_steady_tick(Duration::from_millis(100));

                    let filings = match edgar
                        .latest_filings_all(&ticker, &user_agent, config.edgar.chunk_size)
                        .await
                    {
                        Ok(filings) => filings,
                        Err(e) => {
                            spinner.finish_and_clear();
                            error!("fetch failed: {}", e);
                            exit(1);
                        }
                    };
                    spinner.finish_and_clear();

                    if json {
                        let summaries = filings
                            .iter()
                            .map(|filing| {
                                serde_json::json!({
                                    "form": filing.record.form,
                                    "accession": filing.record.accession_number,
                                    "report_date": filing.record.report_date,
                                    "document": filing.record.primary_document,
                                    "pages": filing.max_cursor() + 1,
                                })
                            })
                            .collect::<Vec<_>>();
                        println!("{}", serde_json::to_string_pretty(&summaries).unwrap());
                    } else {
                        let rows = filings
                            .iter()
                            .map(|filing| FilingSummaryRow {
                                form: filing.record.form.to_string(),
                                accession: filing.record.accession_number.clone(),
                                report_date: filing.record.report_date.clone(),
                                document: filing.record.primary_document.clone(),
                                pages: filing.max_cursor() + 1,
                            })
                            .collect::<Vec<_>>();
                        println!("{}", Table::new(rows).with(Style::markdown()));
                    }
                });
                return;
            }

            let form = match form.parse::<FormType>() {
                Ok(form) => form,
                Err(e) => {
                    error!("{}", e);
                    exit(1);
                }
            };

            let rt = get_tokio_runtime();
            rt.block_on(async {
                let spinner = ProgressBar::new_spinner();
                spinner.set_message(format!("fetching latest {} filing for {}", form, ticker));
                spinner.enable_steady_tick(Duration::from_millis(100));

                let filing = match edgar
                    .latest_filing_chunks(&ticker, form, &user_agent, config.edgar.chunk_size)
                    .await
                {
                    Ok(filing) => filing,
                    Err(e) => {
                        spinner.finish_and_clear();
                        error!("fetch failed: {}", e);
                        exit(1);
                    }
                };
                spinner.finish_and_clear();

                if json {
                    match filing.to_response(cursor as i64) {
                        Ok(payload) => {
                            println!("{}", serde_json::to_string_pretty(&payload).unwrap())
                        }
                        Err(e) => {
                            error!("{}", e);
                            exit(1);
                        }
                    }
                } else {
                    info!(
                        "{} filing {} filed {}, {} chunk pages",
                        filing.record.form,
                        filing.record.accession_number,
                        filing.record.report_date,
                        filing.max_cursor() + 1
                    );
                    match filing.chunk(cursor as i64) {
                        Ok(chunk) => println!("{}", chunk),
                        Err(e) => {
                            error!("{}", e);
                            exit(1);
                        }
                    }
                }
            });
        }
        Commands::Ping { url } => {
            let mut client = GoogleOauth2Server::new();
            if let Some(url) = url {
                client = client.server_url(url);
            }
            match client.health_check() {
                Ok(()) => println!("server instance at {} is healthy", client.server_url),
                Err(_) => {
                    println!("server instance at {} is not available", client.server_url);
                    exit(1);
                }
            }
        }
    }
}
