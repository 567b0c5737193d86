//! Parsing a chained request into its component programs.
//!
//! Strategies are tried in order: a model-assisted structured parse, a
//! rule-based splitter on "then"/"and" connectors, derivation from declared
//! artifact filenames, and finally a single-program fallback. Whatever path
//! produces the list, one property always holds: a request that clearly
//! mentions two languages or uses "then" yields at least two programs.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codegen::infer_language;
use crate::config::constants::CLASSIFICATION_TIMEOUT;
use crate::context::TaskContext;
use crate::error::ExecutorError;
use crate::interfaces::LanguageModel;
use crate::lang::{detect_language, detect_languages_positional, language_for_filename};
use crate::types::{ChainedProgram, ExecutionRequest};
use crate::util::extract_json_array;

static CONNECTOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bthen\b|;\s*and\b|\.\s+and\b").unwrap());

/// Whether the request clearly describes more than one program.
pub fn expects_multiple(request: &ExecutionRequest) -> bool {
    let lowered = request.description.to_lowercase();
    lowered.contains("two programs")
        || lowered.contains("first program")
        || lowered.contains("second program")
        || lowered.contains("prog1")
        || lowered.contains("prog2")
        || lowered.contains(" then ")
        || detect_languages_positional(&lowered).len() >= 2
}

/// Parse the request into an ordered program list.
///
/// Fails only when multi-program hints are present but no strategy can
/// recover more than one program; a plain request degrades to a single
/// program rather than failing.
pub async fn parse_programs(
    llm: &Arc<dyn LanguageModel>,
    request: &ExecutionRequest,
    cancel: &CancellationToken,
) -> Result<Vec<ChainedProgram>, ExecutorError> {
    let expect_multi = expects_multiple(request);

    if let Some(programs) = model_parse(llm, request, cancel).await {
        if !expect_multi || programs.len() >= 2 {
            debug!(count = programs.len(), "model parse accepted");
            return Ok(programs);
        }
        debug!("model parse yielded one program despite multi-program hints");
    }

    let programs = rule_split(request);
    if !programs.is_empty() && (!expect_multi || programs.len() >= 2) {
        debug!(count = programs.len(), "rule split accepted");
        return Ok(programs);
    }

    let programs = from_artifact_names(request);
    if !programs.is_empty() && (!expect_multi || programs.len() >= 2) {
        debug!(count = programs.len(), "artifact-name derivation accepted");
        return Ok(programs);
    }

    if expect_multi {
        // Last resort: one program per mentioned language keeps the
        // two-languages-or-then guarantee even when the splitter failed.
        let languages = detect_languages_positional(&request.description);
        if languages.len() >= 2 {
            return Ok(languages
                .into_iter()
                .enumerate()
                .map(|(index, language)| ChainedProgram {
                    name: format!("prog{}", index + 1),
                    language,
                    description: request.description.clone(),
                    context: TaskContext::new(),
                })
                .collect());
        }
        warn!("multi-program hints present but only one program recoverable");
        return Err(ExecutorError::ChainedProgramFailure(
            "request describes multiple programs but none of the parsing strategies could split it"
                .to_string(),
        ));
    }

    Ok(vec![ChainedProgram {
        name: "prog1".to_string(),
        language: infer_language(request),
        description: request.description.clone(),
        context: TaskContext::new(),
    }])
}

/// Model-assisted structured parse into `[{name, language, description}]`.
async fn model_parse(
    llm: &Arc<dyn LanguageModel>,
    request: &ExecutionRequest,
    cancel: &CancellationToken,
) -> Option<Vec<ChainedProgram>> {
    let prompt = format!(
        "Split this request into its component programs. Respond with ONLY a JSON \
         array of objects with fields \"name\", \"language\", \"description\".\n\n\
         Request: {}\nContext:\n{}",
        request.description,
        request.context.render_for_prompt()
    );
    let response = tokio::time::timeout(
        CLASSIFICATION_TIMEOUT,
        llm.complete(&prompt, request.priority, cancel),
    )
    .await
    .ok()?
    .ok()?;

    let parsed = extract_json_array(&response)?;
    let entries = parsed.as_array()?;
    let mut programs = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let language = entry.get("language")?.as_str()?.trim().to_lowercase();
        let description = entry.get("description")?.as_str()?.trim().to_string();
        if language.is_empty() || description.is_empty() {
            return None;
        }
        let name = entry
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("prog{}", index + 1));
        programs.push(ChainedProgram {
            name,
            language,
            description,
            context: TaskContext::new(),
        });
    }
    if programs.is_empty() {
        None
    } else {
        Some(programs)
    }
}

/// Rule-based splitter: cut the description at its connectors, detect each
/// segment's language, and fill gaps from the positional language list.
fn rule_split(request: &ExecutionRequest) -> Vec<ChainedProgram> {
    let description = request.description.trim();
    let segments: Vec<&str> = CONNECTOR
        .split(description)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if segments.len() < 2 {
        return Vec::new();
    }

    let positional = detect_languages_positional(description);
    let default_language = infer_language(request);
    let mut used = 0usize;

    segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let language = detect_language(segment).unwrap_or_else(|| {
                // Segments like "the same in reverse" inherit the next
                // unassigned mentioned language, then the request default.
                let inherited = positional.get(used).cloned();
                inherited.unwrap_or_else(|| default_language.clone())
            });
            used += 1;
            ChainedProgram {
                name: format!("prog{}", index + 1),
                language,
                description: segment.to_string(),
                context: TaskContext::new(),
            }
        })
        .collect()
}

/// Derive programs from declared artifact filenames (`prog1.go, prog2.py`).
fn from_artifact_names(request: &ExecutionRequest) -> Vec<ChainedProgram> {
    let mut programs = Vec::new();
    for name in request.context.artifact_names() {
        if let Some(language) = language_for_filename(&name) {
            programs.push(ChainedProgram {
                name: name
                    .rsplit_once('.')
                    .map(|(stem, _)| stem.to_string())
                    .unwrap_or_else(|| name.clone()),
                language: language.to_string(),
                description: format!("{} ({})", request.description, name),
                context: TaskContext::new(),
            });
        }
    }
    programs
}
