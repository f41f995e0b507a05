use clap::{Parser, Subcommand, ValueEnum};
use docguard::schema::parse_schema;
use docguard::{Collection, CollectionOptions, CollectionTarget, ExecutionMode, SqliteStore};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process;

/// docguard CLI: schema-checked writes against a SQLite document collection
#[derive(Parser)]
#[command(name = "docguard", version, about)]
struct Cli {
    /// Schema file (YAML)
    #[arg(long)]
    schema: PathBuf,

    /// Database file
    #[arg(long, default_value = "docguard.db")]
    db: PathBuf,

    /// Collection name (default: the schema's `collection`, else the schema file stem)
    #[arg(long)]
    collection: Option<String>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    /// How validation failures are reported
    #[arg(long, default_value = "blocking")]
    mode: Mode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    /// Validation failures exit with an error
    Blocking,
    /// Validation failures are logged and the command reports `ok: false`
    NonBlocking,
}

#[derive(Subcommand)]
enum Command {
    /// Insert a new document
    Insert {
        /// Field values (e.g. --field name="Alice Chen")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Update documents matching a selector
    Update {
        /// Select a document by id
        #[arg(long, conflicts_with = "filters")]
        id: Option<String>,
        /// Select by field equality (e.g. --where status=draft)
        #[arg(long = "where", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
        /// Fields to set (e.g. --set status=published)
        #[arg(long = "set", value_parser = parse_key_value)]
        set: Vec<(String, String)>,
        /// Fields to remove
        #[arg(long = "unset")]
        unset: Vec<String>,
        /// Numeric fields to increment (e.g. --inc views=1)
        #[arg(long = "inc", value_parser = parse_key_value)]
        inc: Vec<(String, String)>,
        /// Update every matching document
        #[arg(long)]
        multi: bool,
        /// Insert when nothing matches
        #[arg(long)]
        upsert: bool,
    },

    /// List documents, optionally filtered
    Find {
        #[arg(long, conflicts_with = "filters")]
        id: Option<String>,
        #[arg(long = "where", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
    },

    /// Remove matching documents
    Remove {
        #[arg(long, conflicts_with = "filters")]
        id: Option<String>,
        #[arg(long = "where", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
    },

    /// Check a document against the schema without writing it
    Check {
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Show the schema, or one field of it
    Schema {
        field: Option<String>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| {
        format!("Invalid key=value pair: no '=' found in '{s}'")
    })?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let schema = parse_schema(&cli.schema)?;
    let name = cli
        .collection
        .clone()
        .or_else(|| schema.collection.clone())
        .or_else(|| {
            cli.schema
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .ok_or("Cannot determine the collection name; pass --collection")?;

    let store = SqliteStore::open(&cli.db, &name)?.with_id_strategy(schema.id.unwrap_or_default());
    let mode = match cli.mode {
        Mode::Blocking => ExecutionMode::Blocking,
        Mode::NonBlocking => ExecutionMode::NonBlocking,
    };
    log::debug!("Opened collection '{name}' in {}", cli.db.display());
    let mut collection = Collection::new(
        CollectionTarget::Existing(store),
        CollectionOptions::new(schema).mode(mode),
    )?;

    match cli.command {
        Command::Insert { fields } => {
            let id = collection.insert(fields_to_value(&fields), None)?;
            let output = match id {
                Some(id) => json!({ "ok": true, "id": id }),
                None => json!({ "ok": false, "invalid": invalid_to_json(collection.invalid_fields()) }),
            };
            print_output(&output, &cli.format)?;
        }

        Command::Update {
            id,
            filters,
            set,
            unset,
            inc,
            multi,
            upsert,
        } => {
            let mut modifier = Map::new();
            if !set.is_empty() {
                modifier.insert("$set".into(), fields_to_value(&set));
            }
            if !unset.is_empty() {
                let keys: Map<String, Value> =
                    unset.into_iter().map(|k| (k, Value::String(String::new()))).collect();
                modifier.insert("$unset".into(), Value::Object(keys));
            }
            if !inc.is_empty() {
                modifier.insert("$inc".into(), fields_to_value(&inc));
            }
            if modifier.is_empty() {
                return Err("update needs at least one of --set, --unset, --inc".into());
            }

            let selector = required_selector("update", id, &filters)?;
            let count = collection.update(
                selector,
                Value::Object(modifier),
                Some(json!({ "multi": multi, "upsert": upsert })),
                None,
            )?;
            let output = match count {
                Some(count) => json!({ "ok": true, "updated": count }),
                None => json!({ "ok": false, "invalid": invalid_to_json(collection.invalid_fields()) }),
            };
            print_output(&output, &cli.format)?;
        }

        Command::Find { id, filters } => {
            let docs = collection.find(selector_value(id, &filters))?;
            let docs: Vec<Value> = docs.into_iter().map(Value::Object).collect();
            print_output(&Value::Array(docs), &cli.format)?;
        }

        Command::Remove { id, filters } => {
            let selector = required_selector("remove", id, &filters)?;
            let removed = collection.remove(selector)?;
            print_output(&json!({ "ok": true, "removed": removed }), &cli.format)?;
        }

        Command::Check { fields } => {
            let issues = collection.check(&fields_to_value(&fields))?;
            print_output(
                &json!({ "valid": issues.is_empty(), "invalid": invalid_to_json(&issues) }),
                &cli.format,
            )?;
        }

        Command::Schema { field } => {
            let value = match field {
                Some(field) => {
                    let def = collection
                        .field_schema(&field)
                        .ok_or_else(|| format!("No field '{field}' in the schema"))?;
                    serde_json::to_value(def)?
                }
                None => serde_json::to_value(collection.schema())?,
            };
            print_output(&value, &cli.format)?;
        }
    }

    Ok(())
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn invalid_to_json(keys: &[docguard::InvalidKey]) -> Value {
    Value::Array(
        keys.iter()
            .map(|k| {
                json!({
                    "name": k.name,
                    "reason": k.reason.code(),
                    "message": k.to_string(),
                })
            })
            .collect(),
    )
}

/// An explicit id wins; otherwise filters become an equality selector, and no filters select everything
fn selector_value(id: Option<String>, filters: &[(String, String)]) -> Value {
    match id {
        Some(id) => Value::String(id),
        None if filters.is_empty() => Value::Null,
        None => fields_to_value(filters),
    }
}

/// Writes that change stored documents must name what they touch
fn required_selector(
    command: &str,
    id: Option<String>,
    filters: &[(String, String)],
) -> Result<Value, String> {
    let selector = selector_value(id, filters);
    if selector.is_null() {
        return Err(format!("{command} needs --id or --where"));
    }
    Ok(selector)
}

fn fields_to_value(fields: &[(String, String)]) -> Value {
    let mut map = Map::new();
    for (key, val) in fields {
        // Try to parse as JSON value (for numbers, booleans, arrays, objects)
        let json_val = serde_json::from_str(val).unwrap_or(Value::String(val.clone()));
        map.insert(key.clone(), json_val);
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_require_a_selector() {
        let err = required_selector("update", None, &[]).unwrap_err();
        assert_eq!(err, "update needs --id or --where");

        assert_eq!(
            required_selector("update", Some("p1".into()), &[]).unwrap(),
            json!("p1")
        );
        assert_eq!(
            required_selector("remove", None, &[("status".into(), "draft".into())]).unwrap(),
            json!({"status": "draft"})
        );
    }

    #[test]
    fn test_field_values_parse_as_json_when_possible() {
        let value = fields_to_value(&[
            ("age".into(), "5".into()),
            ("name".into(), "Ann".into()),
        ]);
        assert_eq!(value, json!({"age": 5, "name": "Ann"}));
    }
}
