//! recsort: sort delimited record files larger than memory

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use env_logger::Env;
use std::path::PathBuf;
use std::process;

use recsort::{
    args::SortArgs,
    config::{KeySpec, SortConfig, SortConfigBuilder},
    error::{SortError, SortResult},
    sort,
};

fn main() {
    let matches = build_cli().get_matches();
    init_logging(matches.get_flag("debug"));

    match run(&matches) {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("recsort: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();
}

fn run(matches: &ArgMatches) -> SortResult<i32> {
    let config = parse_config_from_matches(matches)?;
    let args = parse_args_from_matches(matches)?;
    sort(&config, &args)
}

fn build_cli() -> Command {
    Command::new("recsort")
        .version(env!("CARGO_PKG_VERSION"))
        .override_usage("recsort --schema FIELDS -k KEY [OPTION]... [FILE]...")
        .about("Sort delimited record files, spilling to temporary tapes when memory runs out")
        .arg(Arg::new("files")
            .help("Input files to sort (use '-' or omit for stdin)")
            .num_args(0..)
            .value_name("FILE"))
        .arg(Arg::new("schema")
            .long("schema")
            .help("Record layout as NAME:TYPE pairs, e.g. id:long,name:string")
            .long_help("Record layout as comma separated NAME:TYPE pairs.\n\nTYPE is one of boolean, integer, long, number, date, string, bytes.")
            .value_name("FIELDS")
            .required(true))
        .arg(Arg::new("key")
            .short('k')
            .long("key")
            .help("Sort key field, e.g. 'name' or 'age(d)'; repeat or separate with ';'")
            .long_help("Sort key field. A field is selected by name or by zero-based position as #N and may be followed by (a) for ascending or (d) for descending order.\n\nExamples:\n  id          - ascending by id\n  'age(d)'    - descending by age\n  'city;#0(d)' - by city, then descending by the first field")
            .value_name("KEYDEF")
            .required(true)
            .action(ArgAction::Append))
        .arg(Arg::new("field-separator")
            .short('t')
            .long("field-separator")
            .help("Use SEP as the field separator instead of ','")
            .value_name("SEP"))
        .arg(Arg::new("output")
            .short('o')
            .long("output")
            .help("Write result to FILE instead of standard output")
            .value_name("FILE"))
        .arg(Arg::new("header")
            .long("header")
            .help("Skip the first line of every input and write the field names first")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("buffer-capacity")
            .long("buffer-capacity")
            .help("Records held by the first in-memory chunk")
            .value_name("N")
            .value_parser(value_parser!(usize)))
        .arg(Arg::new("max-chunks")
            .long("max-chunks")
            .help("Maximum number of in-memory chunks before spilling")
            .value_name("N")
            .value_parser(value_parser!(usize)))
        .arg(Arg::new("tapes")
            .long("tapes")
            .help("Number of temporary tapes used for merging")
            .value_name("N")
            .value_parser(value_parser!(usize)))
        .arg(Arg::new("temporary-directory")
            .short('T')
            .long("temporary-directory")
            .help("Use DIR for temporaries, not $TMPDIR or /tmp; may be repeated")
            .value_name("DIR")
            .action(ArgAction::Append))
        .arg(Arg::new("max-record-size")
            .long("max-record-size")
            .help("Largest serialized record in bytes")
            .value_name("BYTES")
            .value_parser(value_parser!(usize)))
        .arg(Arg::new("locale")
            .long("locale")
            .help("Collate string keys according to LOCALE")
            .value_name("LOCALE"))
        .arg(Arg::new("ignore-case")
            .short('f')
            .long("ignore-case")
            .help("Compare string keys without regard to case")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("debug")
            .long("debug")
            .help("Log chunk growth, spills and merge rounds to stderr")
            .action(ArgAction::SetTrue))
}

/// Parse configuration from command line matches
fn parse_config_from_matches(matches: &ArgMatches) -> SortResult<SortConfig> {
    let mut builder = SortConfigBuilder::new();

    for keydefs in matches.get_many::<String>("key").unwrap_or_default() {
        builder = builder.keys(KeySpec::parse_list(keydefs)?);
    }
    if let Some(&capacity) = matches.get_one::<usize>("buffer-capacity") {
        builder = builder.buffer_capacity(capacity);
    }
    if let Some(&chunks) = matches.get_one::<usize>("max-chunks") {
        builder = builder.max_chunks(chunks);
    }
    if let Some(&tapes) = matches.get_one::<usize>("tapes") {
        builder = builder.number_of_tapes(tapes);
    }
    for dir in matches.get_many::<String>("temporary-directory").unwrap_or_default() {
        builder = builder.temp_dir(PathBuf::from(dir));
    }
    if let Some(&size) = matches.get_one::<usize>("max-record-size") {
        builder = builder.max_record_size(size);
    }
    if let Some(locale) = matches.get_one::<String>("locale") {
        builder = builder.locale(locale);
    }
    if matches.get_flag("ignore-case") {
        builder = builder.ignore_case();
    }

    builder.build()
}

fn parse_args_from_matches(matches: &ArgMatches) -> SortResult<SortArgs> {
    let field_separator = match matches.get_one::<String>("field-separator") {
        Some(sep) => {
            let mut chars = sep.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => {
                    return Err(SortError::parse_error(&format!(
                        "field separator must be a single character: '{sep}'"
                    )))
                }
            }
        }
        None => None,
    };

    Ok(SortArgs {
        files: matches.get_many::<String>("files").unwrap_or_default().cloned().collect(),
        output: matches.get_one::<String>("output").cloned(),
        schema: matches.get_one::<String>("schema").cloned().unwrap_or_default(),
        field_separator,
        header: matches.get_flag("header"),
    })
}
