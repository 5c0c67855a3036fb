mod config;
mod logging;
mod transfer;

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::SystemTime;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{Map, Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{info, warn};
use ypw_core::{
    Argon2id, BufferError, CharacterPools, CryptoError, GeneratorError, KdfParams, Key, PartDec,
    PasswordField, PasswordGenerator, PasswordRecord, Record, RecordError, RngEngine,
    SecureBuffer,
};
use ypw_storage::{
    BackupEntry, Container, ContainerError, ContainerLock, ContainerOptions, RetryReason,
    StorageError, WritePolicy, acquire_container_lock, insecure_mode, list_backups,
    recover_from_backup,
};

use crate::config::{
    AppConfig, EngineChoice, config_get, config_set, load_config, save_config,
};
use crate::logging::init_logging;
use crate::transfer::{read_records, write_records};

const JSON_SCHEMA_VERSION: u8 = 1;
const MASKED_PASSWORD: &str = "********";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum CliExitCode {
    Success = 0,
    General = 1,
    Usage = 2,
    NotFound = 3,
    AuthFailed = 4,
    ContainerLocked = 5,
    CorruptOrParse = 6,
    ModifiedExternally = 7,
    PermissionDenied = 8,
}

#[derive(Debug)]
struct CliError {
    code: CliExitCode,
    kind: &'static str,
    message: String,
}

impl CliError {
    fn usage(message: impl Into<String>) -> Self {
        Self {
            code: CliExitCode::Usage,
            kind: "invalid_usage",
            message: message.into(),
        }
    }
}

#[derive(Debug)]
struct CommandOutput {
    message: String,
    payload: Value,
}

#[derive(Debug, Parser)]
#[command(name = "ypw")]
#[command(about = "Encrypted local password containers", version)]
struct Cli {
    /// Container file; defaults to `default_container` from the config.
    #[arg(long, short = 'f', global = true)]
    container: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Read the passphrase and any other secrets from stdin, one per line.
    #[arg(long, global = true)]
    non_interactive: bool,
    /// Save even when the container changed on disk after it was opened.
    #[arg(long, global = true)]
    force: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new, empty container.
    Init,
    List(ListArgs),
    Show(ShowArgs),
    Add(AddArgs),
    Edit(EditArgs),
    Delete(NameArgs),
    /// Re-encrypt the container under a new passphrase.
    ChangePassword,
    Info,
    Generate(GenerateArgs),
    ImportCsv(ImportCsvArgs),
    ExportCsv(ExportCsvArgs),
    /// Replace the container with one of its backups.
    Recover(RecoverArgs),
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Only names containing this text, ignoring case.
    #[arg(long)]
    filter: Option<String>,
}

#[derive(Debug, Args)]
struct NameArgs {
    name: String,
}

#[derive(Debug, Args)]
struct ShowArgs {
    name: String,
    #[arg(long, default_value_t = false)]
    reveal: bool,
}

#[derive(Debug, Args)]
struct AddArgs {
    name: String,
    #[arg(long, default_value = "")]
    host: String,
    #[arg(long, default_value = "")]
    username: String,
    #[arg(long, default_value = "")]
    comment: String,
    /// Use a generated password instead of prompting for one.
    #[arg(long, default_value_t = false)]
    generate: bool,
}

#[derive(Debug, Args)]
struct EditArgs {
    name: String,
    #[arg(long)]
    rename: Option<String>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    comment: Option<String>,
    /// Prompt for a new password.
    #[arg(long, default_value_t = false, conflicts_with = "generate")]
    password: bool,
    /// Replace the password with a generated one.
    #[arg(long, default_value_t = false)]
    generate: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PoolArg {
    Lowercase,
    Uppercase,
    Digits,
    Punctuation,
    Special,
}

impl PoolArg {
    const fn pools(self) -> CharacterPools {
        match self {
            Self::Lowercase => CharacterPools::LOWERCASE,
            Self::Uppercase => CharacterPools::UPPERCASE,
            Self::Digits => CharacterPools::DIGITS,
            Self::Punctuation => CharacterPools::PUNCTUATION,
            Self::Special => CharacterPools::SPECIAL,
        }
    }
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    length: Option<i32>,
    /// Character pools to draw from; defaults to the configured set.
    #[arg(long, value_enum, value_delimiter = ',')]
    pools: Vec<PoolArg>,
    #[arg(long, value_enum)]
    engine: Option<EngineChoice>,
    /// Deterministic output for a given seed. Not for real passwords.
    #[arg(long, conflicts_with = "engine")]
    seed: Option<u64>,
}

#[derive(Debug, Args)]
struct ImportCsvArgs {
    input: PathBuf,
    #[arg(long, default_value_t = ',')]
    separator: char,
}

#[derive(Debug, Args)]
struct ExportCsvArgs {
    output: PathBuf,
    #[arg(long, default_value_t = ',')]
    separator: char,
    /// Skip the plaintext confirmation prompt.
    #[arg(long, default_value_t = false)]
    yes: bool,
}

#[derive(Debug, Args)]
struct RecoverArgs {
    /// Restore the newest backup that opens with the passphrase.
    #[arg(long, default_value_t = false)]
    auto: bool,
}

#[derive(Debug, Serialize)]
struct JsonEnvelope {
    schema_version: u8,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonError>,
}

#[derive(Debug, Serialize)]
struct JsonError {
    code: u8,
    kind: String,
    message: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(&cli) {
        Ok(output) => {
            if cli.json {
                print_envelope(&JsonEnvelope {
                    schema_version: JSON_SCHEMA_VERSION,
                    ok: true,
                    result: Some(output.payload),
                    error: None,
                });
            } else {
                println!("{}", output.message);
            }
            ExitCode::from(CliExitCode::Success as u8)
        }
        Err(error) => {
            if cli.json {
                print_envelope(&JsonEnvelope {
                    schema_version: JSON_SCHEMA_VERSION,
                    ok: false,
                    result: None,
                    error: Some(JsonError {
                        code: error.code as u8,
                        kind: error.kind.to_owned(),
                        message: error.message.clone(),
                    }),
                });
            } else {
                eprintln!("ypw: {}", error.message);
            }
            ExitCode::from(error.code as u8)
        }
    }
}

fn print_envelope(envelope: &JsonEnvelope) {
    match serde_json::to_string(envelope) {
        Ok(line) => println!("{line}"),
        Err(error) => eprintln!("ypw: failed to encode JSON output: {error}"),
    }
}

fn execute(cli: &Cli) -> Result<CommandOutput, CliError> {
    let (mut config, config_path) = load_config(cli.config.clone())?;
    init_logging(&config);

    if let Command::Config { command } = &cli.command {
        return handle_config(command, &mut config, &config_path);
    }

    let mut session = Session::new(cli, config);
    run(&cli.command, &mut session)
}

fn run(command: &Command, session: &mut Session) -> Result<CommandOutput, CliError> {
    match command {
        Command::Init => handle_init(session),
        Command::List(args) => handle_list(session, args),
        Command::Show(args) => handle_show(session, args),
        Command::Add(args) => handle_add(session, args),
        Command::Edit(args) => handle_edit(session, args),
        Command::Delete(args) => handle_delete(session, args),
        Command::ChangePassword => handle_change_password(session),
        Command::Info => handle_info(session),
        Command::Generate(args) => handle_generate(session, args),
        Command::ImportCsv(args) => handle_import_csv(session, args),
        Command::ExportCsv(args) => handle_export_csv(session, args),
        Command::Recover(args) => handle_recover(session, args),
        Command::Config { .. } => Err(CliError::usage(
            "config commands do not open a container",
        )),
    }
}

/// Everything a container command needs beyond its own arguments.
struct Session {
    container: Option<PathBuf>,
    force: bool,
    non_interactive: bool,
    config: AppConfig,
    secrets: Secrets,
    kdf: Argon2id,
}

/// A container unlocked for the duration of one command. Holds the advisory
/// lock when the command modifies the file.
struct Opened {
    path: PathBuf,
    key: Key,
    container: Container,
    _lock: Option<ContainerLock>,
}

impl Opened {
    fn records(&self) -> Result<Vec<PartDec>, CliError> {
        self.container.read(&self.key).map_err(map_container_error)
    }
}

impl Session {
    fn new(cli: &Cli, config: AppConfig) -> Self {
        Self {
            container: cli.container.clone(),
            force: cli.force,
            non_interactive: cli.non_interactive,
            config,
            secrets: Secrets::new(cli.non_interactive),
            kdf: Argon2id(KdfParams::default()),
        }
    }

    fn container_path(&self) -> Result<PathBuf, CliError> {
        if let Some(path) = &self.container {
            return Ok(path.clone());
        }
        if let Some(path) = &self.config.default_container {
            return Ok(PathBuf::from(path));
        }
        Err(CliError::usage(
            "container path is required (use --container or config default_container)",
        ))
    }

    fn options(&self) -> ContainerOptions {
        let max_retained = self.config.backup.max_retained;
        ContainerOptions {
            check_permissions: self.config.security.check_permissions,
            backups: (max_retained > 0).then_some(max_retained),
        }
    }

    fn derive_key(&mut self, prompt: &str, confirm: Option<&str>) -> Result<Key, CliError> {
        let passphrase = self.secrets.passphrase(prompt, confirm)?;
        Key::derive(passphrase.as_slice(), &self.kdf).map_err(map_crypto_error)
    }

    fn open(&mut self, for_write: bool) -> Result<Opened, CliError> {
        let path = self.container_path()?;
        if !path.exists() {
            return Err(CliError {
                code: CliExitCode::NotFound,
                kind: "container_not_found",
                message: format!("no container at {}; run `ypw init` first", path.display()),
            });
        }
        let lock = if for_write {
            Some(acquire_container_lock(&path).map_err(map_storage_error)?)
        } else {
            None
        };

        let key = self.derive_key("Passphrase: ", None)?;
        let container = match Container::open_with(&path, &key, false, self.options()) {
            Ok(container) => {
                info!(target: "audit", event = "container_unlock_success", path = %path.display());
                container
            }
            Err(error) => {
                if matches!(error, ContainerError::InvalidPassword) {
                    warn!(target: "audit", event = "container_unlock_failure", path = %path.display());
                }
                return Err(map_container_error(error));
            }
        };

        Ok(Opened {
            path,
            key,
            container,
            _lock: lock,
        })
    }

    fn create(&mut self, path: &Path) -> Result<Opened, CliError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(map_io_error)?;
        }
        let lock = acquire_container_lock(path).map_err(map_storage_error)?;
        let key = self.derive_key("New passphrase: ", Some("Confirm passphrase: "))?;
        let container = Container::open_with(path, &key, true, self.options())
            .map_err(map_container_error)?;
        info!(target: "audit", event = "container_created", path = %path.display());
        Ok(Opened {
            path: path.to_path_buf(),
            key,
            container,
            _lock: Some(lock),
        })
    }

    fn write_policy(&self) -> WritePolicy {
        WritePolicy {
            force_write: self.force,
            ..WritePolicy::DEFAULT
        }
    }

    fn persist(&self, opened: &mut Opened, records: &[PartDec]) -> Result<(), CliError> {
        opened
            .container
            .save_with(records, self.write_policy())
            .map_err(map_container_error)?;
        info!(
            target: "audit",
            event = "container_saved",
            path = %opened.path.display(),
            records = records.len(),
            forced = self.force
        );
        Ok(())
    }

    fn generate_password(&self) -> Result<SecureBuffer, CliError> {
        let settings = &self.config.generator;
        PasswordGenerator::new(settings.pools(), settings.engine.engine())
            .generate(settings.length)
            .map_err(map_generator_error)
    }
}

/// Where passphrases and record passwords come from: the terminal, or stdin
/// lines in `--non-interactive` mode.
struct Secrets {
    non_interactive: bool,
    queued: Option<VecDeque<SecureBuffer>>,
}

impl Secrets {
    fn new(non_interactive: bool) -> Self {
        Self {
            non_interactive,
            queued: None,
        }
    }

    fn read(&mut self, prompt: &str, confirm: Option<&str>) -> Result<SecureBuffer, CliError> {
        if self.non_interactive {
            return self.next_stdin_line();
        }

        let entered = prompt_secret(prompt)?;
        if let Some(confirm) = confirm
            && prompt_secret(confirm)? != entered
        {
            return Err(CliError {
                code: CliExitCode::Usage,
                kind: "confirmation_mismatch",
                message: "entries do not match".to_owned(),
            });
        }
        Ok(entered)
    }

    fn passphrase(&mut self, prompt: &str, confirm: Option<&str>) -> Result<SecureBuffer, CliError> {
        let passphrase = self.read(prompt, confirm)?;
        if passphrase.is_empty() {
            return Err(CliError {
                code: CliExitCode::Usage,
                kind: "missing_passphrase",
                message: "the passphrase cannot be empty".to_owned(),
            });
        }
        Ok(passphrase)
    }

    fn next_stdin_line(&mut self) -> Result<SecureBuffer, CliError> {
        if self.queued.is_none() {
            let mut raw = Vec::new();
            io::stdin().read_to_end(&mut raw).map_err(map_io_error)?;
            let raw = SecureBuffer::from_vec(raw).map_err(map_buffer_error)?;
            let lines = raw
                .split(|byte| *byte == b'\n')
                .map(|line| SecureBuffer::from_slice(line.strip_suffix(b"\r").unwrap_or(line)))
                .collect::<Result<VecDeque<_>, _>>()
                .map_err(map_buffer_error)?;
            self.queued = Some(lines);
        }

        self.queued
            .as_mut()
            .and_then(|lines| lines.pop_front())
            .ok_or_else(|| CliError {
                code: CliExitCode::Usage,
                kind: "missing_secret",
                message: "expected another line on stdin for --non-interactive mode".to_owned(),
            })
    }
}

fn prompt_secret(prompt: &str) -> Result<SecureBuffer, CliError> {
    let entered = rpassword::prompt_password(prompt).map_err(map_io_error)?;
    SecureBuffer::from_vec(entered.into_bytes()).map_err(map_buffer_error)
}

fn handle_init(session: &mut Session) -> Result<CommandOutput, CliError> {
    let path = session.container_path()?;
    let opened = session.create(&path)?;
    let set_at = opened
        .container
        .password_set_at(&opened.key)
        .map_err(map_container_error)?;

    Ok(CommandOutput {
        message: format!("Created container at {}", path.display()),
        payload: json!({
            "path": path,
            "records": 0,
            "password_set_at": format_time(set_at)
        }),
    })
}

fn handle_list(session: &mut Session, args: &ListArgs) -> Result<CommandOutput, CliError> {
    let opened = session.open(false)?;
    let records = opened.records()?;
    let needle = args.filter.as_deref().map(str::to_lowercase);

    let names: Vec<String> = records
        .iter()
        .map(|record| record.name_lossy().into_owned())
        .filter(|name| {
            needle
                .as_deref()
                .is_none_or(|needle| name.to_lowercase().contains(needle))
        })
        .collect();

    let message = if names.is_empty() {
        "No matching records".to_owned()
    } else {
        names.join("\n")
    };
    Ok(CommandOutput {
        message,
        payload: json!({
            "path": opened.path,
            "total": records.len(),
            "names": names
        }),
    })
}

fn handle_show(session: &mut Session, args: &ShowArgs) -> Result<CommandOutput, CliError> {
    let opened = session.open(false)?;
    let records = opened.records()?;
    let index = find_record(&records, &args.name)?;
    let plaintext = records[index]
        .decrypt_full(&opened.key)
        .map_err(map_record_crypto_error)?
        .value();
    if args.reveal {
        info!(target: "audit", event = "password_revealed", path = %opened.path.display());
    }

    let mut lines = Vec::new();
    let mut payload = Map::new();
    for field in PasswordField::ALL {
        let hidden = matches!(field, PasswordField::Password) && !args.reveal;
        let value = if hidden {
            MASKED_PASSWORD.to_owned()
        } else {
            lossy(plaintext.get(field))
        };
        lines.push(format!("{:<9} {value}", format!("{}:", field.label())));
        if !hidden {
            payload.insert(field.label().to_owned(), json!(value));
        }
    }

    Ok(CommandOutput {
        message: lines.join("\n"),
        payload: Value::Object(payload),
    })
}

fn handle_add(session: &mut Session, args: &AddArgs) -> Result<CommandOutput, CliError> {
    require_name(&args.name)?;
    check_width(PasswordField::Host, args.host.as_bytes())?;
    check_width(PasswordField::Username, args.username.as_bytes())?;
    check_width(PasswordField::Comment, args.comment.as_bytes())?;

    let mut opened = session.open(true)?;
    let mut records = opened.records()?;
    let password = if args.generate {
        session.generate_password()?
    } else {
        session
            .secrets
            .read("Record password: ", Some("Confirm record password: "))?
    };
    check_width(PasswordField::Password, password.as_slice())?;

    let record = PasswordRecord::with_fields(
        args.name.as_bytes(),
        args.host.as_bytes(),
        args.username.as_bytes(),
        password.as_slice(),
        args.comment.as_bytes(),
    );
    records.push(seal(&record, &opened.key)?);
    session.persist(&mut opened, &records)?;

    Ok(CommandOutput {
        message: format!("Added {}", args.name),
        payload: json!({
            "path": opened.path,
            "name": args.name,
            "records": records.len(),
            "generated": args.generate
        }),
    })
}

fn handle_edit(session: &mut Session, args: &EditArgs) -> Result<CommandOutput, CliError> {
    let mut changes: Vec<(PasswordField, &str)> = Vec::new();
    if let Some(name) = &args.rename {
        require_name(name)?;
        changes.push((PasswordField::Name, name.as_str()));
    }
    for (field, value) in [
        (PasswordField::Host, &args.host),
        (PasswordField::Username, &args.username),
        (PasswordField::Comment, &args.comment),
    ] {
        if let Some(value) = value {
            check_width(field, value.as_bytes())?;
            changes.push((field, value.as_str()));
        }
    }
    if changes.is_empty() && !args.password && !args.generate {
        return Err(CliError::usage("nothing to change"));
    }

    let mut opened = session.open(true)?;
    let mut records = opened.records()?;
    let index = find_record(&records, &args.name)?;
    let mut plaintext = records[index]
        .decrypt_full(&opened.key)
        .map_err(map_record_crypto_error)?;

    let new_password = if args.generate {
        Some(session.generate_password()?)
    } else if args.password {
        Some(
            session
                .secrets
                .read("New record password: ", Some("Confirm record password: "))?,
        )
    } else {
        None
    };
    if let Some(password) = &new_password {
        check_width(PasswordField::Password, password.as_slice())?;
    }

    plaintext.update(|record| {
        for (field, value) in &changes {
            record.set(*field, value.as_bytes());
        }
        if let Some(password) = &new_password {
            record.set(PasswordField::Password, password.as_slice());
        }
    });
    records[index] = PartDec::from_plaintext(&plaintext, &opened.key).map_err(map_crypto_error)?;
    session.persist(&mut opened, &records)?;

    let mut changed: Vec<&str> = changes.iter().map(|(field, _)| field.label()).collect();
    if new_password.is_some() {
        changed.push(PasswordField::Password.label());
    }
    Ok(CommandOutput {
        message: format!("Updated {} ({})", args.name, changed.join(", ")),
        payload: json!({
            "path": opened.path,
            "name": records[index].name_lossy(),
            "changed": changed
        }),
    })
}

fn handle_delete(session: &mut Session, args: &NameArgs) -> Result<CommandOutput, CliError> {
    let mut opened = session.open(true)?;
    let mut records = opened.records()?;
    let index = find_record(&records, &args.name)?;
    records.remove(index);
    session.persist(&mut opened, &records)?;

    Ok(CommandOutput {
        message: format!("Deleted {}", args.name),
        payload: json!({
            "path": opened.path,
            "name": args.name,
            "records": records.len()
        }),
    })
}

fn handle_change_password(session: &mut Session) -> Result<CommandOutput, CliError> {
    let mut opened = session.open(true)?;
    let new_key = session.derive_key("New passphrase: ", Some("Confirm new passphrase: "))?;
    let resealed = opened
        .container
        .rotate_key_with(&opened.key, &new_key, session.write_policy())
        .map_err(map_container_error)?;
    info!(
        target: "audit",
        event = "passphrase_changed",
        path = %opened.path.display(),
        records = resealed.len()
    );

    Ok(CommandOutput {
        message: format!("Passphrase changed; {} records re-encrypted", resealed.len()),
        payload: json!({
            "path": opened.path,
            "records": resealed.len()
        }),
    })
}

fn handle_info(session: &mut Session) -> Result<CommandOutput, CliError> {
    let opened = session.open(false)?;
    let header = opened
        .container
        .header(&opened.key)
        .map_err(map_container_error)?;
    let records = opened.records()?;
    let size = fs::metadata(&opened.path).map_err(map_io_error)?.len();
    let open_mode = insecure_mode(&opened.path).map_err(map_io_error)?;
    let backups = list_backups(&opened.path).map_err(map_storage_error)?;
    let modified = opened
        .container
        .is_modified_externally()
        .map_err(map_container_error)?;
    let set_at = format_time(header.password_set_time());

    let permissions = match open_mode {
        Some(mode) => format!("accessible by other users (mode {mode:o})"),
        None => "owner only".to_owned(),
    };
    let message = [
        format!("path:            {}", opened.path.display()),
        format!("format version:  {}", header.version()),
        format!("passphrase set:  {set_at}"),
        format!("records:         {}", records.len()),
        format!("size:            {size} bytes"),
        format!("permissions:     {permissions}"),
        format!("backups:         {}", backups.len()),
        format!("changed on disk: {}", if modified { "yes" } else { "no" }),
    ]
    .join("\n");

    Ok(CommandOutput {
        message,
        payload: json!({
            "path": opened.path,
            "version": header.version(),
            "password_set_at": set_at,
            "records": records.len(),
            "size_bytes": size,
            "insecure_mode": open_mode.map(|mode| format!("{mode:o}")),
            "backups": backups.len(),
            "modified_externally": modified
        }),
    })
}

fn handle_generate(session: &mut Session, args: &GenerateArgs) -> Result<CommandOutput, CliError> {
    let settings = &session.config.generator;
    let pools = if args.pools.is_empty() {
        settings.pools()
    } else {
        args.pools
            .iter()
            .fold(CharacterPools::NONE, |pools, pool| pools | pool.pools())
    };
    let length = args.length.unwrap_or(settings.length);
    let engine = match args.seed {
        Some(seed) => RngEngine::Seeded(seed),
        None => args.engine.unwrap_or(settings.engine).engine(),
    };

    let password = PasswordGenerator::new(pools, engine)
        .generate(length)
        .map_err(map_generator_error)?;
    let value = lossy(password.as_slice());
    Ok(CommandOutput {
        message: value.clone(),
        payload: json!({
            "value": value,
            "length": length,
            "seeded": args.seed.is_some()
        }),
    })
}

fn handle_import_csv(
    session: &mut Session,
    args: &ImportCsvArgs,
) -> Result<CommandOutput, CliError> {
    let separator = separator_byte(args.separator)?;
    let input = File::open(&args.input).map_err(map_io_error)?;
    let report = read_records(input, separator).map_err(map_csv_error)?;

    let path = session.container_path()?;
    let (mut opened, created) = if path.exists() {
        (session.open(true)?, false)
    } else {
        (session.create(&path)?, true)
    };
    let mut records = opened.records()?;
    for record in &report.records {
        records.push(seal(record, &opened.key)?);
    }
    session.persist(&mut opened, &records)?;

    let mut lines = vec![format!(
        "Imported {} records into {}",
        report.records.len(),
        path.display()
    )];
    for rejected in &report.rejected {
        lines.push(format!("line {} skipped: {}", rejected.line, rejected.reason));
    }
    for line in &report.truncated {
        lines.push(format!("line {line}: values cut to the field widths"));
    }

    Ok(CommandOutput {
        message: lines.join("\n"),
        payload: json!({
            "path": path,
            "created": created,
            "imported": report.records.len(),
            "rejected": report
                .rejected
                .iter()
                .map(|rejected| json!({ "line": rejected.line, "reason": rejected.reason }))
                .collect::<Vec<_>>(),
            "truncated_lines": report.truncated,
            "records": records.len()
        }),
    })
}

fn handle_export_csv(
    session: &mut Session,
    args: &ExportCsvArgs,
) -> Result<CommandOutput, CliError> {
    let separator = separator_byte(args.separator)?;
    confirm_plaintext_export(session.non_interactive, args.yes)?;
    let opened = session.open(false)?;
    info!(
        target: "audit",
        event = "export_invoked",
        path = %opened.path.display(),
        output = %args.output.display()
    );

    let records = opened.records()?;
    let plaintext = records
        .iter()
        .map(|record| {
            record
                .decrypt_full(&opened.key)
                .map(|full| full.value())
                .map_err(map_record_crypto_error)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let output = create_private_file(&args.output)?;
    write_records(output, separator, &plaintext).map_err(map_csv_error)?;

    Ok(CommandOutput {
        message: format!(
            "Exported {} records to {}",
            plaintext.len(),
            args.output.display()
        ),
        payload: json!({
            "output": args.output,
            "records": plaintext.len()
        }),
    })
}

fn handle_recover(session: &mut Session, args: &RecoverArgs) -> Result<CommandOutput, CliError> {
    let path = session.container_path()?;
    let backups = list_backups(&path).map_err(map_storage_error)?;
    if backups.is_empty() {
        return Err(CliError {
            code: CliExitCode::NotFound,
            kind: "no_backups",
            message: format!("no backups found for {}", path.display()),
        });
    }
    if !args.auto && session.non_interactive {
        return Err(CliError::usage(
            "--non-interactive requires --auto for `ypw recover`",
        ));
    }

    let lock = acquire_container_lock(&path).map_err(map_storage_error)?;
    let key = session.derive_key("Passphrase: ", None)?;
    let mut candidates = Vec::new();
    for backup in backups {
        let opened = Container::open(&backup.path, &key, false)
            .and_then(|container| container.read(&key));
        match opened {
            Ok(records) => candidates.push((backup, records.len())),
            Err(error) => {
                warn!(backup = %backup.path.display(), %error, "skipping unusable backup");
            }
        }
    }
    if candidates.is_empty() {
        return Err(CliError {
            code: CliExitCode::CorruptOrParse,
            kind: "no_valid_backups",
            message: "no backup opens with this passphrase".to_owned(),
        });
    }

    let selected = if args.auto {
        0
    } else {
        prompt_recovery_selection(&path, &candidates)?
    };
    let (backup, record_count) = &candidates[selected];
    let corrupt_path = recover_from_backup(&lock, &backup.path).map_err(map_storage_error)?;
    info!(
        target: "audit",
        event = "backup_restored",
        path = %path.display(),
        backup = %backup.path.display()
    );

    Ok(CommandOutput {
        message: format!("Recovered container from {}", backup.path.display()),
        payload: json!({
            "path": path,
            "restored_from": backup.path,
            "backup_timestamp": backup.timestamp,
            "records": record_count,
            "corrupt_path": corrupt_path,
            "auto": args.auto
        }),
    })
}

fn prompt_recovery_selection(
    path: &Path,
    candidates: &[(BackupEntry, usize)],
) -> Result<usize, CliError> {
    println!("Recovery candidates for {}:", path.display());
    for (index, (backup, records)) in candidates.iter().enumerate() {
        println!(
            "  {}. {} (timestamp={}, records={records})",
            index + 1,
            backup.path.display(),
            backup.timestamp
        );
    }

    print!("Select backup to restore [1-{}]: ", candidates.len());
    io::stdout().flush().map_err(map_io_error)?;
    let mut input = String::new();
    io::stdin().read_line(&mut input).map_err(map_io_error)?;
    let parsed = input
        .trim()
        .parse::<usize>()
        .map_err(|_| CliError::usage("backup selection must be a positive integer"))?;
    if parsed == 0 || parsed > candidates.len() {
        return Err(CliError::usage(format!(
            "backup selection must be between 1 and {}",
            candidates.len()
        )));
    }
    Ok(parsed - 1)
}

fn handle_config(
    command: &ConfigCommand,
    config: &mut AppConfig,
    config_path: &Path,
) -> Result<CommandOutput, CliError> {
    match command {
        ConfigCommand::Get { key } => {
            let value =
                config_get(config, key).ok_or_else(|| CliError::usage("unknown config key"))?;
            Ok(CommandOutput {
                message: value.clone(),
                payload: json!({
                    "key": key,
                    "value": value
                }),
            })
        }
        ConfigCommand::Set { key, value } => {
            config_set(config, key, value)?;
            save_config(config, config_path)?;
            info!(target: "audit", event = "config_changed", key = %key);
            Ok(CommandOutput {
                message: format!("Updated {key}"),
                payload: json!({
                    "key": key,
                    "value": config_get(config, key)
                }),
            })
        }
        ConfigCommand::List => Ok(CommandOutput {
            message: toml::to_string_pretty(&*config)
                .unwrap_or_else(|_| "failed to serialize config".to_owned()),
            payload: serde_json::to_value(&*config).map_err(|_| CliError {
                code: CliExitCode::General,
                kind: "config_serialize_failed",
                message: "failed to serialize config".to_owned(),
            })?,
        }),
    }
}

fn confirm_plaintext_export(non_interactive: bool, acknowledged: bool) -> Result<(), CliError> {
    if acknowledged {
        return Ok(());
    }
    if non_interactive {
        return Err(CliError::usage(
            "plaintext export requires --yes in --non-interactive mode",
        ));
    }

    print!("Warning: the export holds every password in plain text. Continue? [y/N]: ");
    io::stdout().flush().map_err(map_io_error)?;
    let mut input = String::new();
    io::stdin().read_line(&mut input).map_err(map_io_error)?;
    if matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
        Ok(())
    } else {
        Err(CliError::usage("plaintext export cancelled"))
    }
}

fn create_private_file(path: &Path) -> Result<File, CliError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(map_io_error)?;
    }
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).map_err(map_io_error)
}

fn find_record(records: &[PartDec], name: &str) -> Result<usize, CliError> {
    records
        .iter()
        .position(|record| record.name() == name.as_bytes())
        .ok_or_else(|| CliError {
            code: CliExitCode::NotFound,
            kind: "record_not_found",
            message: format!("no record named `{name}`"),
        })
}

fn seal(record: &PasswordRecord, key: &Key) -> Result<PartDec, CliError> {
    let record = Record::new(record).map_err(map_record_error)?;
    PartDec::from_plaintext(&record, key).map_err(map_crypto_error)
}

fn require_name(name: &str) -> Result<(), CliError> {
    if name.is_empty() {
        return Err(CliError::usage("record name cannot be empty"));
    }
    check_width(PasswordField::Name, name.as_bytes())
}

fn check_width(field: PasswordField, value: &[u8]) -> Result<(), CliError> {
    if value.len() > field.width() {
        return Err(CliError::usage(format!(
            "{} is {} bytes long; the field holds at most {}",
            field.label(),
            value.len(),
            field.width()
        )));
    }
    Ok(())
}

fn separator_byte(separator: char) -> Result<u8, CliError> {
    u8::try_from(separator)
        .ok()
        .filter(|byte| byte.is_ascii() && *byte != b'"' && *byte != b'\n')
        .ok_or_else(|| CliError::usage("separator must be a single ASCII character"))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn format_time(time: SystemTime) -> String {
    let stamp = OffsetDateTime::from(time);
    stamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| stamp.unix_timestamp().to_string())
}

fn map_io_error(error: io::Error) -> CliError {
    let code = match error.kind() {
        io::ErrorKind::PermissionDenied => CliExitCode::PermissionDenied,
        io::ErrorKind::NotFound => CliExitCode::NotFound,
        _ => CliExitCode::General,
    };
    CliError {
        code,
        kind: "io_error",
        message: error.to_string(),
    }
}

fn map_storage_error(error: StorageError) -> CliError {
    match error {
        StorageError::Locked => CliError {
            code: CliExitCode::ContainerLocked,
            kind: "container_locked",
            message: "container locked by another process".to_owned(),
        },
        StorageError::NoBackups(_) => CliError {
            code: CliExitCode::NotFound,
            kind: "no_backups",
            message: error.to_string(),
        },
        StorageError::Io(error) => map_io_error(error),
    }
}

fn map_container_error(error: ContainerError) -> CliError {
    match error {
        ContainerError::InvalidPassword => CliError {
            code: CliExitCode::AuthFailed,
            kind: "invalid_password",
            message: "invalid passphrase".to_owned(),
        },
        ContainerError::FileFormat(_) => CliError {
            code: CliExitCode::CorruptOrParse,
            kind: "container_format_error",
            message: error.to_string(),
        },
        ContainerError::Decryption(_) => CliError {
            code: CliExitCode::CorruptOrParse,
            kind: "record_decryption_failed",
            message: error.to_string(),
        },
        ContainerError::Retryable(RetryReason::ExternallyModified) => CliError {
            code: CliExitCode::ModifiedExternally,
            kind: "container_modified_externally",
            message: format!("{error}; rerun with --force to overwrite"),
        },
        ContainerError::AlreadyExists(_) => CliError {
            code: CliExitCode::Usage,
            kind: "container_exists",
            message: error.to_string(),
        },
        ContainerError::InsecurePermissions { .. } => CliError {
            code: CliExitCode::PermissionDenied,
            kind: "insecure_permissions",
            message: format!("{error}; tighten it or set security.check_permissions = false"),
        },
        ContainerError::Io(error) => map_io_error(error),
        ContainerError::Crypto(error) => map_crypto_error(error),
        ContainerError::Buffer(error) => map_buffer_error(error),
        ContainerError::Retryable(RetryReason::PartialWrite(_)) => CliError {
            code: CliExitCode::General,
            kind: "write_failed",
            message: error.to_string(),
        },
    }
}

fn map_crypto_error(error: CryptoError) -> CliError {
    match error {
        CryptoError::KdfFailure | CryptoError::KdfOutOfBounds { .. } => CliError {
            code: CliExitCode::General,
            kind: "key_derivation_failed",
            message: error.to_string(),
        },
        CryptoError::Buffer(error) => map_buffer_error(error),
        other => CliError {
            code: CliExitCode::General,
            kind: "crypto_error",
            message: other.to_string(),
        },
    }
}

/// Records that fail to open after the header validated point at a damaged
/// file, not at a wrong passphrase.
fn map_record_crypto_error(error: CryptoError) -> CliError {
    match error {
        CryptoError::Authentication
        | CryptoError::Malformed { .. }
        | CryptoError::RecordSize { .. } => CliError {
            code: CliExitCode::CorruptOrParse,
            kind: "record_decryption_failed",
            message: error.to_string(),
        },
        other => map_crypto_error(other),
    }
}

fn map_record_error(error: RecordError) -> CliError {
    CliError {
        code: CliExitCode::General,
        kind: "record_error",
        message: error.to_string(),
    }
}

fn map_buffer_error(error: BufferError) -> CliError {
    CliError {
        code: CliExitCode::General,
        kind: "buffer_error",
        message: error.to_string(),
    }
}

fn map_generator_error(error: GeneratorError) -> CliError {
    match error {
        GeneratorError::InvalidLength(_) | GeneratorError::NoPools => CliError::usage(error.to_string()),
        GeneratorError::RandomFailure | GeneratorError::Buffer(_) => CliError {
            code: CliExitCode::General,
            kind: "generator_failed",
            message: error.to_string(),
        },
    }
}

fn map_csv_error(error: csv::Error) -> CliError {
    let message = error.to_string();
    match error.into_kind() {
        csv::ErrorKind::Io(error) => map_io_error(error),
        _ => CliError {
            code: CliExitCode::CorruptOrParse,
            kind: "csv_error",
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::fs;
    use std::path::{Path, PathBuf};

    use clap::Parser;
    use ypw_core::{Argon2id, KdfParams, SecureBuffer};
    use ypw_storage::{
        ContainerError, RetryReason, StorageError, acquire_container_lock, backup_directory,
    };

    use super::{
        Cli, CliError, CliExitCode, CommandOutput, Secrets, Session, map_container_error,
        map_storage_error, run,
    };
    use crate::config::AppConfig;

    const FAST_KDF: Argon2id = Argon2id(KdfParams {
        memory_kib: 8 * 1024,
        iterations: 1,
        parallelism: 1,
    });

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ypw-cli-tests-{}-{name}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn scripted(lines: &[&str]) -> Secrets {
        let queued = lines
            .iter()
            .map(|line| SecureBuffer::from_slice(line.as_bytes()).expect("line buffer"))
            .collect::<VecDeque<_>>();
        Secrets {
            non_interactive: true,
            queued: Some(queued),
        }
    }

    fn invoke(
        container: &Path,
        args: &[&str],
        secrets: &[&str],
        config: AppConfig,
    ) -> Result<CommandOutput, CliError> {
        let container = container.to_str().expect("utf-8 temp path");
        let argv = ["ypw", "--non-interactive", "--container", container]
            .into_iter()
            .chain(args.iter().copied());
        let cli = Cli::try_parse_from(argv).expect("arguments parse");
        let mut session = Session {
            secrets: scripted(secrets),
            kdf: FAST_KDF,
            ..Session::new(&cli, config)
        };
        run(&cli.command, &mut session)
    }

    fn quiet_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.backup.max_retained = 0;
        config
    }

    fn ypw(container: &Path, args: &[&str], secrets: &[&str]) -> Result<CommandOutput, CliError> {
        invoke(container, args, secrets, quiet_config())
    }

    #[test]
    fn add_list_show_round() {
        let dir = temp_dir("flow");
        let path = dir.join("secrets.ypw");

        ypw(&path, &["init"], &["hunter2"]).expect("init");
        ypw(
            &path,
            &["add", "site", "--host", "example.org", "--username", "alice"],
            &["hunter2", "abc"],
        )
        .expect("add");
        ypw(&path, &["add", "Mail"], &["hunter2", "m41l"]).expect("add second");

        let listed = ypw(&path, &["list"], &["hunter2"]).expect("list");
        assert_eq!(listed.payload["names"], serde_json::json!(["site", "Mail"]));
        let filtered = ypw(&path, &["list", "--filter", "MAI"], &["hunter2"]).expect("filter");
        assert_eq!(filtered.payload["names"], serde_json::json!(["Mail"]));

        let masked = ypw(&path, &["show", "site"], &["hunter2"]).expect("show");
        assert_eq!(masked.payload["host"], "example.org");
        assert_eq!(masked.payload.get("password"), None);
        assert!(!masked.message.contains("abc"));

        let revealed = ypw(&path, &["show", "site", "--reveal"], &["hunter2"]).expect("reveal");
        assert_eq!(revealed.payload["password"], "abc");

        let missing = ypw(&path, &["show", "nope"], &["hunter2"]).expect_err("no such record");
        assert_eq!(missing.code, CliExitCode::NotFound);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn wrong_passphrase_is_an_auth_failure() {
        let dir = temp_dir("auth");
        let path = dir.join("secrets.ypw");
        ypw(&path, &["init"], &["right"]).expect("init");

        let error = ypw(&path, &["list"], &["wrong"]).expect_err("wrong passphrase");
        assert_eq!(error.code, CliExitCode::AuthFailed);
        assert_eq!(error.kind, "invalid_password");

        let again = ypw(&path, &["init"], &["right"]).expect_err("already exists");
        assert_eq!(again.kind, "container_exists");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn edit_and_delete_rewrite_the_container() {
        let dir = temp_dir("edit");
        let path = dir.join("secrets.ypw");
        ypw(&path, &["init"], &["pw"]).expect("init");
        ypw(&path, &["add", "old"], &["pw", "first"]).expect("add");

        let nothing = ypw(&path, &["edit", "old"], &["pw"]).expect_err("no changes");
        assert_eq!(nothing.code, CliExitCode::Usage);

        ypw(
            &path,
            &["edit", "old", "--rename", "new", "--comment", "moved", "--password"],
            &["pw", "second"],
        )
        .expect("edit");
        let shown = ypw(&path, &["show", "new", "--reveal"], &["pw"]).expect("show");
        assert_eq!(shown.payload["password"], "second");
        assert_eq!(shown.payload["comment"], "moved");

        ypw(&path, &["delete", "new"], &["pw"]).expect("delete");
        let listed = ypw(&path, &["list"], &["pw"]).expect("list");
        assert_eq!(listed.payload["total"], 0);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn generated_password_fills_the_record() {
        let dir = temp_dir("generate-add");
        let path = dir.join("secrets.ypw");
        ypw(&path, &["init"], &["pw"]).expect("init");
        ypw(&path, &["add", "gen", "--generate"], &["pw"]).expect("add generated");

        let shown = ypw(&path, &["show", "gen", "--reveal"], &["pw"]).expect("show");
        let password = shown.payload["password"].as_str().expect("string password");
        assert_eq!(password.len(), 15);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn change_password_retires_the_old_passphrase() {
        let dir = temp_dir("rotate");
        let path = dir.join("secrets.ypw");
        ypw(&path, &["init"], &["old"]).expect("init");
        ypw(&path, &["add", "kept"], &["old", "value"]).expect("add");

        let changed = ypw(&path, &["change-password"], &["old", "new"]).expect("change");
        assert_eq!(changed.payload["records"], 1);

        let stale = ypw(&path, &["list"], &["old"]).expect_err("old passphrase");
        assert_eq!(stale.code, CliExitCode::AuthFailed);
        let shown = ypw(&path, &["show", "kept", "--reveal"], &["new"]).expect("new passphrase");
        assert_eq!(shown.payload["password"], "value");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn csv_import_then_export() {
        let dir = temp_dir("csv");
        let path = dir.join("imported.ypw");
        let input = dir.join("input.csv");
        let output = dir.join("out/export.csv");
        fs::write(
            &input,
            "mail;imap.example.org;alice;s3cret;work\nbroken;line\nbank;;bob;1234;\n",
        )
        .expect("write csv");

        let input_arg = input.to_str().expect("utf-8");
        let imported = ypw(
            &path,
            &["import-csv", input_arg, "--separator", ";"],
            &["pw"],
        )
        .expect("import creates the container");
        assert_eq!(imported.payload["created"], true);
        assert_eq!(imported.payload["imported"], 2);
        assert_eq!(imported.payload["rejected"][0]["line"], 2);

        let output_arg = output.to_str().expect("utf-8");
        let refused = ypw(&path, &["export-csv", output_arg], &["pw"]).expect_err("needs --yes");
        assert_eq!(refused.code, CliExitCode::Usage);
        assert!(!output.exists());

        ypw(&path, &["export-csv", output_arg, "--yes"], &["pw"]).expect("export");
        let exported = fs::read_to_string(&output).expect("read export");
        assert_eq!(
            exported,
            "mail,imap.example.org,alice,s3cret,work\nbank,,bob,1234,\n"
        );

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn held_lock_blocks_modification_but_not_reads() {
        let dir = temp_dir("locked");
        let path = dir.join("secrets.ypw");
        ypw(&path, &["init"], &["pw"]).expect("init");

        let lock = acquire_container_lock(&path).expect("hold lock");
        let error = ypw(&path, &["add", "x"], &["pw", "y"]).expect_err("locked");
        assert_eq!(error.code, CliExitCode::ContainerLocked);
        ypw(&path, &["list"], &["pw"]).expect("reads do not lock");
        drop(lock);

        ypw(&path, &["add", "x"], &["pw", "y"]).expect("add after release");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn recover_restores_newest_backup() {
        let dir = temp_dir("recover");
        let path = dir.join("secrets.ypw");
        let config = AppConfig::default();
        invoke(&path, &["init"], &["pw"], config.clone()).expect("init");
        invoke(&path, &["add", "one"], &["pw", "1"], config.clone()).expect("add one");
        invoke(&path, &["add", "two"], &["pw", "2"], config.clone()).expect("add two");
        fs::write(&path, b"YAPET1.0garbage").expect("corrupt");

        let broken = invoke(&path, &["list"], &["pw"], config.clone()).expect_err("corrupt");
        assert_eq!(broken.code, CliExitCode::CorruptOrParse);

        let recovered = invoke(&path, &["recover", "--auto"], &["pw"], config.clone())
            .expect("recover");
        assert_eq!(recovered.payload["records"], 1);
        let corrupt = recovered.payload["corrupt_path"]
            .as_str()
            .map(PathBuf::from)
            .expect("corrupt copy");
        assert_eq!(fs::read(&corrupt).expect("read corrupt"), b"YAPET1.0garbage");

        let listed = invoke(&path, &["list"], &["pw"], config).expect("list restored");
        assert_eq!(listed.payload["names"], serde_json::json!(["one"]));

        assert!(backup_directory(&path).starts_with(&dir));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn seeded_generation_is_repeatable() {
        let dir = temp_dir("seeded");
        let path = dir.join("unused.ypw");
        let args = ["generate", "--length", "32", "--seed", "7", "--pools", "digits"];

        let first = ypw(&path, &args, &[]).expect("generate");
        let second = ypw(&path, &args, &[]).expect("generate again");
        assert_eq!(first.payload, second.payload);

        let value = first.payload["value"].as_str().expect("string");
        assert_eq!(value.len(), 32);
        assert!(value.bytes().all(|byte| byte.is_ascii_digit()));

        let error = ypw(&path, &["generate", "--length", "0"], &[]).expect_err("zero length");
        assert_eq!(error.code, CliExitCode::Usage);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn stdin_secrets_run_out_cleanly() {
        let mut secrets = scripted(&["only"]);
        assert_eq!(secrets.passphrase("p", None).expect("first").as_slice(), b"only");
        let error = secrets.passphrase("p", None).expect_err("exhausted");
        assert_eq!(error.kind, "missing_secret");

        let mut empty = scripted(&[""]);
        assert_eq!(
            empty.passphrase("p", None).expect_err("empty").kind,
            "missing_passphrase"
        );
    }

    #[test]
    fn library_errors_map_to_stable_exit_codes() {
        let locked = map_storage_error(StorageError::Locked);
        assert_eq!(locked.code, CliExitCode::ContainerLocked);
        assert_eq!(locked.message, "container locked by another process");

        let stale = map_container_error(ContainerError::Retryable(
            RetryReason::ExternallyModified,
        ));
        assert_eq!(stale.code, CliExitCode::ModifiedExternally);
        assert!(stale.message.contains("--force"));

        let denied = map_container_error(ContainerError::InsecurePermissions {
            path: PathBuf::from("/tmp/x.ypw"),
            mode: 0o644,
        });
        assert_eq!(denied.code, CliExitCode::PermissionDenied);
    }
}
