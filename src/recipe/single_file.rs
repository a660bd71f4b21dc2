//! Single-file packages: a source file opening with an embedded recipe
//! comment is treated as a one-shot project.
//!
//! The recipe rides in the first comment of the file, introduced by a
//! `dub.sdl:` or `dub.json:` marker line:
//!
//! ```d
//! /+ dub.sdl:
//!    name "hello"
//!    dependency "logger" version="~>1.0"
//! +/
//! void main() { }
//! ```

use std::path::Path;

use fs_err as fs;

use super::{Recipe, RecipeError, RecipeFormat};
use crate::document::StrictMode;

/// The embedded recipe text and its format, as found in a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRecipe {
    pub format: RecipeFormat,
    pub text: String,
}

/// Scan the head of a source file for an embedded recipe comment.
///
/// Only a comment before any code is honored; a shebang line is skipped.
/// Returns `None` when the file opens with plain code.
pub fn extract_embedded_recipe(source: &str) -> Option<EmbeddedRecipe> {
    let mut rest = source;
    if rest.starts_with("#!") {
        rest = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
    }
    let rest = rest.trim_start();

    let (terminator, body) = if let Some(body) = rest.strip_prefix("/+") {
        ("+/", body)
    } else if let Some(body) = rest.strip_prefix("/*") {
        ("*/", body)
    } else {
        return None;
    };
    let body = &body[..body.find(terminator)?];

    let (marker_line, recipe_text) = body.trim_start().split_once('\n')?;
    let format = match marker_line.trim() {
        "dub.sdl:" => RecipeFormat::Sdl,
        "dub.json:" => RecipeFormat::Json,
        _ => return None,
    };
    Some(EmbeddedRecipe {
        format,
        text: recipe_text.to_string(),
    })
}

/// Load a single-file package. The recipe's relative paths resolve against
/// the file's directory, so the returned recipe pins the file itself as the
/// main source.
pub fn load_single_file_package(path: &Path) -> Result<Recipe, RecipeError> {
    let source = fs::read_to_string(path).map_err(|source| RecipeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let embedded =
        extract_embedded_recipe(&source).ok_or_else(|| RecipeError::NoEmbeddedRecipe {
            path: path.to_path_buf(),
        })?;

    let source_name = path.to_string_lossy();
    let mut recipe = Recipe::parse(
        &embedded.text,
        embedded.format,
        &source_name,
        StrictMode::Warn,
    )
    .map_err(|err| {
        RecipeError::Parse(Box::new(err.with_source(source_name.clone(), embedded.text.clone())))
    })?;

    // the file is the whole package: it is the main (and only) source
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    recipe
        .build
        .source_files
        .entry(String::new())
        .or_default()
        .push(file_name.clone());
    if recipe.build.main_source_file.is_none() {
        recipe.build.main_source_file = Some(file_name.into());
    }
    if recipe.build.target_type == super::TargetType::Autodetect {
        recipe.build.target_type = super::TargetType::Executable;
    }
    Ok(recipe)
}
