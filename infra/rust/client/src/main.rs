use oxt_service_api::{
  api::{
    client_prepare_search, client_prepare_setup, client_prepare_update,
    client_process_output, Client, Group, GroupParams, KeyMaterial,
    ModpGroup, Operation, RistrettoGroup, UpdateCounter, UpdateMessage,
  },
  dataset::{load_queries, load_records, parse_queries},
  rpc::{
    ClientSearchRequest, ClientUpdateRequest, ServerSearchResponse,
    ServerUpdateResponse, ValidateResponse,
  },
};

use std::error::Error;
use std::path::Path;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

const SERVER_URL_DEFAULT: &str = "http://0.0.0.0:8080";
const KEYS_PATH_DEFAULT: &str = "oxt_keys.json";
const COUNTER_PATH_DEFAULT: &str = "oxt_counter.json";

type ClientResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Config {
  server: Option<String>,
  keys_path: Option<String>,
  counter_path: Option<String>,
}

enum Command {
  Setup { dataset: String },
  Update { keyword: String, ids: Vec<String>, op: Operation },
  Search { queries: Vec<Vec<String>> },
}

struct Settings {
  server: String,
  keys_path: String,
  counter_path: String,
  group: GroupParams,
  command: Command,
}

impl Settings {
  fn parse_from_cli_flags() -> ClientResult<Self> {
    let matches = App::new("OXT encrypted search client")
      .version("0.0.1")
      .about("Builds, updates and searches a remote encrypted index")
      .setting(AppSettings::SubcommandRequiredElseHelp)
      .arg(
        Arg::with_name("keys")
          .short("k")
          .long("keys")
          .takes_value(true)
          .help("Key material file, generated when missing"),
      )
      .arg(
        Arg::with_name("counter")
          .long("counter")
          .takes_value(true)
          .help("Update counter file"),
      )
      .arg(
        Arg::with_name("server")
          .short("s")
          .long("server")
          .takes_value(true)
          .help("Base URL of the search server"),
      )
      .arg(
        Arg::with_name("group")
          .short("g")
          .long("group")
          .takes_value(true)
          .possible_values(&["modp", "ristretto"])
          .default_value("modp")
          .help("Group used when generating new key material"),
      )
      .arg(
        Arg::with_name("config")
          .short("c")
          .long("config")
          .takes_value(true)
          .default_value("")
          .help("Configuration file path"),
      )
      .subcommand(
        SubCommand::with_name("setup")
          .about("Encrypts a dataset and uploads it")
          .arg(
            Arg::with_name("dataset")
              .short("d")
              .long("dataset")
              .takes_value(true)
              .required(true)
              .help("Dataset file, JSON records or the text format"),
          ),
      )
      .subcommand(
        SubCommand::with_name("update")
          .about("Adds or deletes document ids for one keyword")
          .arg(
            Arg::with_name("keyword")
              .short("w")
              .long("keyword")
              .takes_value(true)
              .required(true),
          )
          .arg(
            Arg::with_name("id")
              .short("i")
              .long("id")
              .takes_value(true)
              .multiple(true)
              .required(true),
          )
          .arg(
            Arg::with_name("delete")
              .long("delete")
              .help("Delete the ids instead of adding them"),
          ),
      )
      .subcommand(
        SubCommand::with_name("search")
          .about("Runs conjunctive queries")
          .arg(
            Arg::with_name("query")
              .short("q")
              .long("query")
              .takes_value(true)
              .help("Keywords separated by '#'"),
          )
          .arg(
            Arg::with_name("query_file")
              .short("f")
              .long("query_file")
              .takes_value(true)
              .conflicts_with("query")
              .help("File with one query per line"),
          ),
      )
      .get_matches();

    let config = match matches.value_of("config") {
      Some(path) if !path.is_empty() => parse_local_config(path)?,
      _ => Config::default(),
    };

    let server = pick(&matches, "server", config.server, SERVER_URL_DEFAULT);
    let keys_path = pick(&matches, "keys", config.keys_path, KEYS_PATH_DEFAULT);
    let counter_path =
      pick(&matches, "counter", config.counter_path, COUNTER_PATH_DEFAULT);
    let group = match matches.value_of("group") {
      Some("ristretto") => GroupParams::Ristretto,
      _ => GroupParams::rfc3526_2048(),
    };

    let command = match matches.subcommand() {
      ("setup", Some(sub)) => Command::Setup {
        dataset: required(sub, "dataset")?,
      },
      ("update", Some(sub)) => Command::Update {
        keyword: required(sub, "keyword")?,
        ids: sub
          .values_of("id")
          .map(|v| v.map(String::from).collect())
          .unwrap_or_default(),
        op: if sub.is_present("delete") {
          Operation::Delete
        } else {
          Operation::Add
        },
      },
      ("search", Some(sub)) => {
        let queries = match (sub.value_of("query"), sub.value_of("query_file")) {
          (Some(q), _) => parse_queries(q),
          (None, Some(path)) => load_queries(path)?,
          (None, None) => return Err("--query or --query_file required".into()),
        };
        Command::Search { queries }
      }
      _ => return Err("a subcommand is required".into()),
    };

    Ok(Self {
      server,
      keys_path,
      counter_path,
      group,
      command,
    })
  }
}

fn main() {
  env_logger::init();
  if let Err(err) = run() {
    eprintln!("Error: {}", err);
    std::process::exit(1);
  }
}

fn run() -> ClientResult<()> {
  let settings = Settings::parse_from_cli_flags()?;

  let keys = if Path::new(&settings.keys_path).is_file() {
    println!("> Reading key material from {}", settings.keys_path);
    KeyMaterial::load(&settings.keys_path)?
  } else {
    println!("> Generating key material in {}", settings.keys_path);
    let keys = KeyMaterial::generate(settings.group.clone());
    keys.write_to_file(&settings.keys_path)?;
    keys
  };
  if *keys.group_params() != settings.group {
    warn!("existing key material overrides the requested group");
  }

  let counter = if Path::new(&settings.counter_path).is_file() {
    UpdateCounter::load(&settings.counter_path)?
  } else {
    UpdateCounter::new()
  };

  match keys.group_params().clone() {
    GroupParams::Ristretto => {
      let client = Client::new(keys, RistrettoGroup)?.with_counter(counter);
      run_command(client, &settings)
    }
    params => {
      let client =
        Client::new(keys, ModpGroup::from_params(&params)?)?.with_counter(counter);
      run_command(client, &settings)
    }
  }
}

fn run_command<G: Group>(
  mut client: Client<G>,
  settings: &Settings,
) -> ClientResult<()> {
  let http = reqwest::blocking::Client::new();
  match &settings.command {
    Command::Setup { dataset } => {
      println!("> Reading dataset from {}", dataset);
      let records = load_records(dataset)?;
      println!("> Encrypting {} keywords", records.len());
      let (um, payload_size) = client_prepare_setup(&mut client, records)?;
      println!("> Uploading {} postings ({} bytes)", um.len(), payload_size);
      send_update(&http, &settings.server, um)?;
      save_counter(&client, settings)
    }
    Command::Update { keyword, ids, op } => {
      let um = client_prepare_update(&mut client, keyword, ids, *op)?;
      println!("> Sending {} {:?} updates", um.len(), op);
      send_update(&http, &settings.server, um)?;
      save_counter(&client, settings)
    }
    Command::Search { queries } => {
      for query in queries {
        let (sm, state) = client_prepare_search(&client, query)?;
        debug!(
          "driving term has {} postings",
          state.get_num_postings()
        );
        let csr = ClientSearchRequest::new(sm);
        let ssr: ServerSearchResponse = http
          .post(format!("{}/search", settings.server))
          .json(&csr)
          .send()?
          .json()?;
        ssr.validate(csr.id)?;
        let resp = ssr.result.ok_or("search response carries no result")?;
        let ids = client_process_output(&client, &state, resp)?;
        println!("> {}: {} results", query.join("#"), ids.len());
        for id in ids {
          println!("{}", id);
        }
      }
      Ok(())
    }
  }
}

fn send_update(
  http: &reqwest::blocking::Client,
  server: &str,
  um: UpdateMessage,
) -> ClientResult<()> {
  let cur = ClientUpdateRequest::new(um);
  let sur: ServerUpdateResponse = http
    .post(format!("{}/update", server))
    .json(&cur)
    .send()?
    .json()?;
  sur.validate(cur.id)?;
  if let Some(result) = sur.result {
    println!("> Server applied {} postings", result.applied);
  }
  Ok(())
}

// The counter is only written once the server has accepted the update,
// otherwise later searches would ask for postings that do not exist
fn save_counter<G: Group>(
  client: &Client<G>,
  settings: &Settings,
) -> ClientResult<()> {
  client.get_counter().write_to_file(&settings.counter_path)?;
  println!("> Counter written to {}", settings.counter_path);
  Ok(())
}

fn pick(
  matches: &ArgMatches,
  flag: &str,
  from_config: Option<String>,
  default: &str,
) -> String {
  matches
    .value_of(flag)
    .map(String::from)
    .or(from_config)
    .unwrap_or_else(|| default.to_string())
}

fn required(matches: &ArgMatches, name: &str) -> ClientResult<String> {
  matches
    .value_of(name)
    .map(String::from)
    .ok_or_else(|| format!("--{} not provided", name).into())
}

fn parse_local_config(path: &str) -> ClientResult<Config> {
  let f = std::fs::File::open(path)?;
  let config: Config = serde_yaml::from_reader(f)?;

  Ok(config)
}
