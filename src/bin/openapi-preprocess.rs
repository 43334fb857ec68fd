//! OpenAPI Preprocess CLI
//!
//! Command-line interface for preprocessing OpenAPI documents and validating
//! payloads against them.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use openapi_preprocess::{
    load_document_auto, load_value, preprocess, Body, Direction, DocumentValidator,
    PreprocessOptions, RequestShape, SerDes, ValidateError, ValidateRequestOpts,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "openapi-preprocess")]
#[command(about = "Prepare OpenAPI schemas for request/response validation")]
#[command(version)]
struct Cli {
    /// Log resolution and rewrite details to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preprocess a document and print the result
    Preprocess {
        /// Document source: file path or URL (http:// or https://)
        document: String,

        /// Format with a registered serdes (repeatable)
        #[arg(long = "serdes-format", value_name = "FORMAT")]
        serdes_formats: Vec<String>,

        /// View of the document to print
        #[arg(long, value_enum, default_value_t = DirectionArg::Request)]
        direction: DirectionArg,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a request body, or a response body when --status is given
    Validate {
        /// Document source: file path or URL (http:// or https://)
        document: String,

        /// Payload file (JSON or YAML)
        payload: PathBuf,

        /// Route pattern as written in the document, e.g. /pets/{id}
        #[arg(long)]
        route: String,

        /// HTTP method
        #[arg(long, short)]
        method: String,

        /// Response status; validates the payload as a response body
        #[arg(long)]
        status: Option<String>,

        /// Media type of the payload
        #[arg(long)]
        media_type: Option<String>,

        /// Path parameter as NAME=VALUE (repeatable)
        #[arg(long = "path-param", value_name = "NAME=VALUE", value_parser = parse_pair)]
        path_params: Vec<(String, String)>,

        /// Query parameter as NAME=VALUE (repeatable)
        #[arg(long, value_name = "NAME=VALUE", value_parser = parse_pair)]
        query: Vec<(String, String)>,

        /// Request header as NAME=VALUE (repeatable)
        #[arg(long, value_name = "NAME=VALUE", value_parser = parse_pair)]
        header: Vec<(String, String)>,

        /// Accept query parameters the operation doesn't declare
        #[arg(long)]
        allow_unknown_query: bool,

        /// Format with a registered serdes (repeatable)
        #[arg(long = "serdes-format", value_name = "FORMAT")]
        serdes_formats: Vec<String>,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DirectionArg {
    Request,
    Response,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        Direction::from_request_flag(arg == DirectionArg::Request)
    }
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Preprocess {
            document,
            serdes_formats,
            direction,
            output,
            pretty,
        } => run_preprocess(
            &document,
            options_for(&serdes_formats),
            direction.into(),
            output,
            pretty,
        ),

        Commands::Validate {
            document,
            payload,
            route,
            method,
            status,
            media_type,
            path_params,
            query,
            header,
            allow_unknown_query,
            serdes_formats,
            json,
        } => run_validate(ValidateArgs {
            document,
            payload,
            route,
            method,
            status,
            media_type,
            path_params,
            query,
            headers: header,
            options: options_for(&serdes_formats).validate_requests(ValidateRequestOpts {
                allow_unknown_query_parameters: allow_unknown_query,
                ..Default::default()
            }),
            json_output: json,
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Logs go to stderr so stdout stays clean for documents and JSON results.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn options_for(serdes_formats: &[String]) -> PreprocessOptions {
    serdes_formats
        .iter()
        .fold(PreprocessOptions::new(), |options, format| {
            options.with_serdes(SerDes::new(format.as_str()))
        })
}

fn run_preprocess(
    source: &str,
    options: PreprocessOptions,
    direction: Direction,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<(), u8> {
    let mut document = load_document_auto(source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let report = preprocess(&mut document, &options).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    for pointer in &report.skipped_responses {
        eprintln!("Warning: skipped unresolvable response {}", pointer);
    }

    let value = document.to_value_for(direction);
    let json_output = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

struct ValidateArgs {
    document: String,
    payload: PathBuf,
    route: String,
    method: String,
    status: Option<String>,
    media_type: Option<String>,
    path_params: Vec<(String, String)>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    options: PreprocessOptions,
    json_output: bool,
}

fn run_validate(args: ValidateArgs) -> Result<(), u8> {
    let ValidateArgs {
        document: source,
        payload: payload_path,
        route,
        method,
        status,
        media_type,
        path_params,
        query,
        headers,
        options,
        json_output,
    } = args;

    let payload = load_value(&payload_path).map_err(|e| {
        report_error(json_output, &format!("loading payload: {}", e));
        e.exit_code() as u8
    })?;

    let mut document = load_document_auto(&source).map_err(|e| {
        report_error(json_output, &format!("loading document: {}", e));
        e.exit_code() as u8
    })?;
    preprocess(&mut document, &options).map_err(|e| {
        report_error(json_output, &e.to_string());
        e.exit_code() as u8
    })?;

    let validator = DocumentValidator::new(&document, &options).map_err(|e| {
        report_error(json_output, &e.to_string());
        e.exit_code() as u8
    })?;

    let result = match &status {
        Some(status) => validator.validate_response(
            &route,
            &method,
            status,
            media_type.as_deref(),
            &payload,
        ),
        None => {
            let mut request = RequestShape::new(route.as_str(), method.as_str());
            for (name, value) in path_params {
                request = request.with_path_param(name, value);
            }
            for (name, value) in query {
                request = request.with_query(name, value);
            }
            for (name, value) in headers {
                request = request.with_header(name, value);
            }
            if let Some(media_type) = &media_type {
                request = request.with_header("content-type", media_type.as_str());
            }
            validator
                .validate_request(request.with_body(Body::Json(payload)))
                .map(|_| ())
        }
    };

    match result {
        Ok(()) => {
            if json_output {
                println!(r#"{{"valid":true}}"#);
            } else {
                println!("Valid");
            }
            Ok(())
        }
        Err(ValidateError::Invalid(failure)) => {
            if json_output {
                let output = serde_json::json!({
                    "valid": false,
                    "status": failure.status,
                    "errors": failure.errors
                });
                println!("{}", output);
            } else {
                eprintln!("Validation failed ({}):", failure.status);
                for error in &failure.errors {
                    eprintln!("  {}", error);
                }
            }
            Err(1)
        }
        Err(e) => {
            report_error(json_output, &e.to_string());
            Err(e.exit_code() as u8)
        }
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}
