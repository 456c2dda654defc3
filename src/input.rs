use crate::model::{Category, Environment};
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Command {
    Create {
        description: String,
        image: Option<PathBuf>,
    },
    Status,
    Catalog(Option<Category>),
    Care {
        item: String,
        category: Option<Category>,
    },
    Finish(u32),
    Say(String),
    Wear(String),
    Travel(Environment),
    Evolve,
    Release { confirmed: bool },
    Help,
    Quit,
}

fn rest_of(line: &str, word: &str) -> String {
    line[word.len()..].trim().to_string()
}

pub(crate) fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let word = line.split_whitespace().next().unwrap_or_default();
    let rest = rest_of(line, word);

    let cmd = match word.to_ascii_lowercase().as_str() {
        "new" | "create" => {
            let (image, description) = match rest.strip_prefix("--image") {
                Some(after) => {
                    let after = after.trim_start();
                    let path = after.split_whitespace().next().ok_or("--image needs a path")?;
                    (Some(PathBuf::from(path)), rest_of(after, path))
                }
                None => (None, rest),
            };
            Command::Create { description, image }
        }
        "status" | "s" => Command::Status,
        "catalog" | "c" => {
            if rest.is_empty() {
                Command::Catalog(None)
            } else {
                Command::Catalog(Some(rest.parse::<Category>().map_err(|e| e.to_string())?))
            }
        }
        "care" | "feed" | "play" | "rest" => {
            if rest.is_empty() {
                return Err(format!("usage: {word} <item>"));
            }
            let category = match word.to_ascii_lowercase().as_str() {
                "feed" => Some(Category::Food),
                "play" => Some(Category::Play),
                "rest" => Some(Category::Rest),
                _ => None,
            };
            Command::Care {
                item: rest,
                category,
            }
        }
        "finish" | "done" => {
            let score = if rest.is_empty() {
                0
            } else {
                rest.parse::<u32>().map_err(|_| format!("not a score: {rest}"))?
            };
            Command::Finish(score)
        }
        "say" | "chat" => Command::Say(rest),
        "wear" => Command::Wear(rest),
        "travel" => Command::Travel(rest.parse::<Environment>().map_err(|e| e.to_string())?),
        "evolve" => Command::Evolve,
        "release" => Command::Release {
            confirmed: matches!(rest.to_ascii_lowercase().as_str(), "yes" | "y"),
        },
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        other => return Err(format!("unknown command {other:?}; try `help`")),
    };
    Ok(Some(cmd))
}
