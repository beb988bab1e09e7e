//! State actions - symbolic edits applied to a terraform state.
//!
//! Actions are declared in migration files as strings:
//!
//! | Action | Meaning |
//! |--------|---------|
//! | `mv <source> <destination>` | move a resource |
//! | `xmv <source> <destination>` | move every resource matching a `*` pattern |
//! | `rm <address>...` | remove resources |
//! | `import <address> <id>` | import an existing object |
//! | `replace-provider <source> <destination>` | replace a provider (terraform >= 0.13) |
//!
//! Multi-state migrations accept only `mv` and `xmv`.
//!
//! Applying an action never modifies the input state; a new [`State`] is
//! returned and the caller threads it into the next action.

pub mod parser;
pub mod wildcard;

use std::fmt;
use std::str::FromStr;

use semver::VersionReq;
use thiserror::Error;

use crate::tfexec::{State, StateSource, TerraformCli, TerraformVersion, TfError};

pub use parser::{quote_word, split_words};
pub use wildcard::{MovePair, WildcardExpander};

/// Terraform versions that support `state replace-provider`.
pub const REPLACE_PROVIDER_REQUIREMENT: &str = ">=0.13.0";

/// Action errors.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action string could not be tokenized.
    #[error("failed to parse action `{input}`: {message}")]
    Syntax {
        /// The action string.
        input: String,
        /// What went wrong.
        message: String,
    },

    /// The action string is blank.
    #[error("action is empty")]
    Empty,

    /// The verb is not valid for this migration type.
    #[error("unknown {kind} action: {verb}")]
    UnknownVerb {
        /// Migration type the action was declared in.
        kind: &'static str,
        /// The verb.
        verb: String,
    },

    /// Wrong number of arguments.
    #[error("{verb} action expects {expected} argument(s), got {got}")]
    Arity {
        /// The verb.
        verb: String,
        /// Accepted argument count.
        expected: String,
        /// Actual argument count.
        got: usize,
    },

    /// The wildcard pattern could not be compiled.
    #[error("invalid wildcard pattern: {0}")]
    Pattern(#[source] regex::Error),

    /// The terraform binary is too old for this action.
    #[error("{action} requires terraform {required}, but the installed version is {actual}")]
    UnsupportedVersion {
        /// The verb.
        action: &'static str,
        /// Accepted versions.
        required: VersionReq,
        /// Installed version.
        actual: TerraformVersion,
    },

    /// Terraform failed.
    #[error(transparent)]
    Terraform(#[from] TfError),
}

/// An action on a single state.
#[derive(Debug, Clone)]
pub enum StateAction {
    /// `mv`
    Move {
        /// Source address.
        source: String,
        /// Destination address.
        destination: String,
    },
    /// `xmv`
    WildcardMove(WildcardExpander),
    /// `rm`
    Remove {
        /// Addresses removed in one call.
        addresses: Vec<String>,
    },
    /// `import`
    Import {
        /// Address to import into.
        address: String,
        /// Provider-specific object id.
        id: String,
    },
    /// `replace-provider`
    ReplaceProvider {
        /// Provider being replaced.
        source: String,
        /// Replacement provider.
        destination: String,
    },
}

impl StateAction {
    /// The verb of this action.
    pub fn verb(&self) -> &'static str {
        match self {
            StateAction::Move { .. } => "mv",
            StateAction::WildcardMove(_) => "xmv",
            StateAction::Remove { .. } => "rm",
            StateAction::Import { .. } => "import",
            StateAction::ReplaceProvider { .. } => "replace-provider",
        }
    }

    /// Apply the action to `state`, returning the updated state.
    pub async fn apply(
        &self,
        tf: &dyn TerraformCli,
        state: &State,
    ) -> Result<State, ActionError> {
        match self {
            StateAction::Move {
                source,
                destination,
            } => {
                let (state, _) = tf.state_mv(state, None, source, destination).await?;
                Ok(state)
            }
            StateAction::WildcardMove(expander) => {
                let moves = expand_moves(tf, expander, state).await?;
                let mut current = state.clone();
                for pair in moves {
                    let (next, _) = tf
                        .state_mv(&current, None, &pair.source, &pair.destination)
                        .await?;
                    current = next;
                }
                Ok(current)
            }
            StateAction::Remove { addresses } => Ok(tf.state_rm(state, addresses).await?),
            StateAction::Import { address, id } => {
                Ok(tf.state_import(state, address, id).await?)
            }
            StateAction::ReplaceProvider {
                source,
                destination,
            } => {
                let required = VersionReq::parse(REPLACE_PROVIDER_REQUIREMENT)
                    .map_err(|e| TfError::Version(e.to_string()))?;
                let actual = tf.version().await?;
                if !actual.satisfies(&required) {
                    return Err(ActionError::UnsupportedVersion {
                        action: self.verb(),
                        required,
                        actual,
                    });
                }
                Ok(tf.state_replace_provider(state, source, destination).await?)
            }
        }
    }
}

impl FromStr for StateAction {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words = split_words(s)?;
        let (verb, args) = words.split_first().ok_or(ActionError::Empty)?;

        match verb.as_str() {
            "mv" => {
                let [source, destination] = exact_args(verb, args)?;
                Ok(StateAction::Move {
                    source,
                    destination,
                })
            }
            "xmv" => {
                let [source, destination] = exact_args(verb, args)?;
                Ok(StateAction::WildcardMove(WildcardExpander::new(
                    source,
                    destination,
                )?))
            }
            "rm" => {
                if args.is_empty() {
                    return Err(ActionError::Arity {
                        verb: verb.clone(),
                        expected: "at least 1".to_string(),
                        got: 0,
                    });
                }
                Ok(StateAction::Remove {
                    addresses: args.to_vec(),
                })
            }
            "import" => {
                let [address, id] = exact_args(verb, args)?;
                Ok(StateAction::Import { address, id })
            }
            "replace-provider" => {
                let [source, destination] = exact_args(verb, args)?;
                Ok(StateAction::ReplaceProvider {
                    source,
                    destination,
                })
            }
            other => Err(ActionError::UnknownVerb {
                kind: "state",
                verb: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for StateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<&str> = match self {
            StateAction::Move {
                source,
                destination,
            }
            | StateAction::ReplaceProvider {
                source,
                destination,
            } => vec![source.as_str(), destination.as_str()],
            StateAction::WildcardMove(expander) => {
                vec![expander.source(), expander.destination()]
            }
            StateAction::Remove { addresses } => addresses.iter().map(String::as_str).collect(),
            StateAction::Import { address, id } => vec![address.as_str(), id.as_str()],
        };
        write_action(f, self.verb(), &args)
    }
}

/// An action that moves resources from one state to another.
#[derive(Debug, Clone)]
pub enum MultiStateAction {
    /// `mv`
    Move {
        /// Address in the source state.
        source: String,
        /// Address in the destination state.
        destination: String,
    },
    /// `xmv`, expanded against the source state only.
    WildcardMove(WildcardExpander),
}

impl MultiStateAction {
    /// The verb of this action.
    pub fn verb(&self) -> &'static str {
        match self {
            MultiStateAction::Move { .. } => "mv",
            MultiStateAction::WildcardMove(_) => "xmv",
        }
    }

    /// Apply the action, returning the updated `(from, to)` states.
    pub async fn apply(
        &self,
        from_tf: &dyn TerraformCli,
        from: &State,
        to: &State,
    ) -> Result<(State, State), ActionError> {
        match self {
            MultiStateAction::Move {
                source,
                destination,
            } => move_across(from_tf, from, to, source, destination).await,
            MultiStateAction::WildcardMove(expander) => {
                let moves = expand_moves(from_tf, expander, from).await?;
                let mut current = (from.clone(), to.clone());
                for pair in moves {
                    current = move_across(
                        from_tf,
                        &current.0,
                        &current.1,
                        &pair.source,
                        &pair.destination,
                    )
                    .await?;
                }
                Ok(current)
            }
        }
    }
}

impl FromStr for MultiStateAction {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words = split_words(s)?;
        let (verb, args) = words.split_first().ok_or(ActionError::Empty)?;

        match verb.as_str() {
            "mv" => {
                let [source, destination] = exact_args(verb, args)?;
                Ok(MultiStateAction::Move {
                    source,
                    destination,
                })
            }
            "xmv" => {
                let [source, destination] = exact_args(verb, args)?;
                Ok(MultiStateAction::WildcardMove(WildcardExpander::new(
                    source,
                    destination,
                )?))
            }
            other => Err(ActionError::UnknownVerb {
                kind: "multi_state",
                verb: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for MultiStateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultiStateAction::Move {
                source,
                destination,
            } => write_action(f, self.verb(), &[source.as_str(), destination.as_str()]),
            MultiStateAction::WildcardMove(expander) => write_action(
                f,
                self.verb(),
                &[expander.source(), expander.destination()],
            ),
        }
    }
}

fn exact_args<const N: usize>(verb: &str, args: &[String]) -> Result<[String; N], ActionError> {
    <[String; N]>::try_from(args.to_vec()).map_err(|args| ActionError::Arity {
        verb: verb.to_string(),
        expected: N.to_string(),
        got: args.len(),
    })
}

fn write_action(f: &mut fmt::Formatter<'_>, verb: &str, args: &[&str]) -> fmt::Result {
    f.write_str(verb)?;
    for arg in args {
        write!(f, " {}", quote_word(arg))?;
    }
    Ok(())
}

/// Expand a wildcard move against the addresses currently in `state`.
async fn expand_moves(
    tf: &dyn TerraformCli,
    expander: &WildcardExpander,
    state: &State,
) -> Result<Vec<MovePair>, ActionError> {
    if expander.wildcards() == 0 {
        return Ok(expander.expand::<String>(&[]));
    }

    let list = tf
        .state_list(&StateSource::Explicit(state.clone()), &[])
        .await?;
    let moves = expander.expand(&list);
    tracing::debug!(
        source = expander.source(),
        destination = expander.destination(),
        moves = moves.len(),
        "expanded wildcard move"
    );
    Ok(moves)
}

async fn move_across(
    from_tf: &dyn TerraformCli,
    from: &State,
    to: &State,
    source: &str,
    destination: &str,
) -> Result<(State, State), ActionError> {
    let (from, to) = from_tf.state_mv(from, Some(to), source, destination).await?;
    let to = to.ok_or(TfError::MissingOutput("destination"))?;
    Ok((from, to))
}
