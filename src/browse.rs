//! Interactive browser
//!
//! Line-oriented host for the resource tree: `ls`, `cd`, `show`, `apply`, ...
//! Every command runs through the application's command queue.

use crate::app::{describe_node, App, Target};
use crate::azure::client::WriteMethod;
use crate::resource::document::{WriteConfirmer, WriteTarget};
use anyhow::Result;
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::Mutex;

const HELP: &str = "\
Commands:
  ls                          list children of the current node
  cd <n|label|..|/>           move through the tree
  pwd                         show the current path
  show [target]               print a resource as JSON and keep it open
  apply <file> [target]       write a JSON file back (PATCH or PUT)
  api-version [target]        api-version used for a resource
  url [target]                ARM URL of a node or resource
  id [target]                 resource ID of a node
  portal [target]             Azure portal link
  export [--bicep] [--force] [--out <file>] [target]
                              deployment template (JSON or Bicep)
  token                       print the current access token
  namespaces                  list provider namespaces
  filter [ns...|--clear]      show or set the provider filter
  refresh                     drop cached provider data
  docs                        list open documents
  close <uri|all>             forget open documents
  signin                      sign in to Azure
  quit                        leave

A target is a child index or label, or a resource ID starting with '/'.";

/// Reads answers from stdin, shared between the command loop and confirmations
pub struct Prompt {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl Prompt {
    pub fn stdin() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// Print `question` and read one trimmed line; `None` at end of input
    pub async fn read_line(&self, question: &str) -> Option<String> {
        print!("{}", question);
        let _ = std::io::stdout().flush();

        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => Some(line.trim().to_string()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to read input: {}", e);
                None
            }
        }
    }
}

/// Asks on the terminal which path and method to write to
pub struct TerminalConfirmer {
    prompt: Arc<Prompt>,
}

impl TerminalConfirmer {
    pub fn new(prompt: Arc<Prompt>) -> Self {
        Self { prompt }
    }
}

#[async_trait]
impl WriteConfirmer for TerminalConfirmer {
    async fn confirm(&self, resource_id: &str) -> Option<WriteTarget> {
        let path = self
            .prompt
            .read_line(&format!("Resource path [{}]: ", resource_id))
            .await?;
        let resource_id = if path.is_empty() {
            resource_id.to_string()
        } else {
            path
        };

        let method = self
            .prompt
            .read_line("Method (PATCH/PUT, empty to cancel): ")
            .await?;
        if method.is_empty() {
            return None;
        }

        match method.parse::<WriteMethod>() {
            Ok(method) => Some(WriteTarget {
                resource_id,
                method,
            }),
            Err(e) => {
                eprintln!("{}", e);
                None
            }
        }
    }
}

/// Run the interactive loop until `quit` or end of input
pub async fn run(app: &mut App, prompt: Arc<Prompt>) -> Result<()> {
    let mut changes = app.documents.subscribe();
    println!("tarm {} - type 'help' for commands", crate::VERSION);

    loop {
        loop {
            match changes.try_recv() {
                Ok(uri) => println!("~ {} updated", uri),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }

        let question = format!("{}> ", app.get_breadcrumb().join(" > "));
        let Some(line) = prompt.read_line(&question).await else {
            println!();
            return Ok(());
        };
        if line.is_empty() {
            continue;
        }

        tracing::debug!("Command: {}", line);
        match handle_command(app, &prompt, &line).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(message) => eprintln!("{}", message),
        }
    }
}

/// Handle one command line, returns true if the browser should quit
async fn handle_command(
    app: &mut App,
    prompt: &Arc<Prompt>,
    line: &str,
) -> std::result::Result<bool, String> {
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    let arg = (!rest.is_empty()).then_some(rest);

    match command {
        "quit" | "exit" | "q" => return Ok(true),
        "help" | "?" => println!("{}", HELP),

        "ls" => {
            for (index, node) in app.list().await?.iter().enumerate() {
                println!("{:>3}  {}", index, describe_node(node));
            }
        }
        "cd" => match arg {
            None | Some("/") => app.navigate_root(),
            Some("..") => {
                app.navigate_back();
            }
            Some(selector) => app.enter(selector).await?,
        },
        "pwd" => println!("{}", app.get_breadcrumb().join(" > ")),

        "show" => {
            let id = resource_id(app, arg).await?;
            println!("{}", app.show(&id).await?);
        }
        "apply" => {
            let (file, target) = match rest.split_once(char::is_whitespace) {
                Some((file, target)) => (file, Some(target.trim())),
                None if !rest.is_empty() => (rest, None),
                None => return Err("usage: apply <file> [target]".to_string()),
            };
            let text = tokio::fs::read_to_string(file)
                .await
                .map_err(|e| format!("Error reading {}. {}", file, e))?;
            let id = resource_id(app, target).await?;
            let confirmer = Arc::new(TerminalConfirmer::new(prompt.clone()));
            println!("{}", app.apply(&id, text, confirmer).await?);
        }
        "api-version" => {
            let id = resource_id(app, arg).await?;
            println!("{}", app.api_version(&id).await?);
        }
        "url" => {
            let target = app.resolve_target(arg).await?;
            println!("{}", app.resource_url(&target).await?);
        }
        "id" => {
            let target = app.resolve_target(arg).await?;
            println!("{}", target.id().ok_or("This node has no resource ID")?);
        }
        "portal" => {
            let target = app.resolve_target(arg).await?;
            println!("{}", app.portal_link(&target).await?);
        }
        "export" => {
            let mut bicep = false;
            let mut force = false;
            let mut output = None;
            let mut target = None;
            let mut words = rest.split_whitespace();
            while let Some(word) = words.next() {
                match word {
                    "--bicep" => bicep = true,
                    "--force" => force = true,
                    "--out" => output = words.next().map(PathBuf::from),
                    other => target = Some(other),
                }
            }
            let id = resource_id(app, target).await?;
            println!("{}", app.export(&id, output, bicep, force).await?);
        }
        "token" => println!("{}", app.token().await?),

        "namespaces" => {
            for namespace in app.namespaces().await? {
                println!("{}", namespace);
            }
        }
        "filter" => match arg {
            None if app.config.provider_filter.is_empty() => println!("(no filter)"),
            None => println!("{}", app.config.provider_filter.join(" ")),
            Some("--clear") => app.clear_provider_filter()?,
            Some(namespaces) => {
                let selected = namespaces.split_whitespace().map(str::to_string).collect();
                app.set_provider_filter(selected).await?;
            }
        },
        "refresh" => {
            app.refresh();
            println!("Provider data will be reloaded");
        }

        "docs" => {
            for uri in app.documents.open_uris() {
                match app.documents.stat(&uri) {
                    Ok(stat) => println!("{}  {} bytes  modified {}", uri, stat.size, stat.mtime),
                    Err(_) => println!("{}", uri),
                }
            }
        }
        "close" => {
            let keep: Vec<String> = match arg {
                None => return Err("usage: close <uri|all>".to_string()),
                Some("all") => Vec::new(),
                Some(uri) => app
                    .documents
                    .open_uris()
                    .into_iter()
                    .filter(|open| !open.eq_ignore_ascii_case(uri))
                    .collect(),
            };
            for uri in app.documents.sweep(&keep) {
                println!("Closed {}", uri);
            }
        }

        "signin" => {
            if app.sign_in().await? {
                println!("Signed in");
            } else {
                println!("Sign-in did not complete");
            }
        }

        other => return Err(format!("Unknown command '{}', try 'help'", other)),
    }

    Ok(false)
}

/// Resource ID of a command target
async fn resource_id(app: &mut App, arg: Option<&str>) -> std::result::Result<String, String> {
    match app.resolve_target(arg).await? {
        Target::Id(id) => Ok(id),
        Target::Node(node) => node
            .resource_id()
            .map(str::to_string)
            .ok_or_else(|| format!("{} is not a resource", node.label())),
    }
}
