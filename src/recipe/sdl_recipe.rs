//! Conversion of block-format recipes onto the shared document schema.
//!
//! The block format spells list settings as repeated tags with positional
//! values and restricts them to platforms with a `platform=` attribute,
//! which maps onto the suffixed key the pattern-field mechanism consumes:
//! `libs "ssl" platform="posix"` becomes the `libs-posix` key.

use miette::SourceSpan;

use crate::document::{
    parse_sdl, BindError, BindResult, Mapping, Node, SdlTag, Sequence,
};

/// Settings holding a single scalar value.
const SCALAR_KEYS: &[&str] = &[
    "name",
    "version",
    "description",
    "homepage",
    "license",
    "copyright",
    "mainSourceFile",
    "targetType",
    "targetName",
    "targetPath",
    "workingDirectory",
    "defaultConfiguration",
];

/// List settings; repeated tags append, `platform=` suffixes the key.
const LIST_KEYS: &[&str] = &[
    "authors",
    "platforms",
    "sourcePaths",
    "sourceFiles",
    "excludedSourceFiles",
    "importPaths",
    "stringImportPaths",
    "versions",
    "debugVersions",
    "dflags",
    "lflags",
    "libs",
    "copyFiles",
    "preGenerateCommands",
    "postGenerateCommands",
    "preBuildCommands",
    "postBuildCommands",
    "preRunCommands",
    "postRunCommands",
    "buildRequirements",
    "buildOptions",
];

/// Map settings; attributes become entries, `platform=` suffixes the key.
const MAP_KEYS: &[&str] = &["environments", "buildEnvironments", "runEnvironments"];

/// Parse block-format recipe text into the schema's node shape.
pub fn sdl_to_node(text: &str) -> BindResult<Node> {
    let tags = parse_sdl(text)?;
    tags_to_mapping(&tags, (0, text.len().max(1)).into())
}

fn tags_to_mapping(tags: &[SdlTag], span: SourceSpan) -> BindResult<Node> {
    let mut mapping = Mapping::new(span);

    for tag in tags {
        match tag.name.as_str() {
            "dependency" => dependency_entry(&mut mapping, tag)?,
            "configuration" => configuration_entry(&mut mapping, tag)?,
            "subPackage" => subpackage_entry(&mut mapping, tag)?,
            name if SCALAR_KEYS.contains(&name) => {
                let value = tag.single_value()?.clone();
                if mapping
                    .insert(name.to_string(), tag.name_span, Node::Scalar(value))
                    .is_some()
                {
                    return Err(BindError::duplicate_key(name, tag.name_span));
                }
            }
            name if LIST_KEYS.contains(&name) => {
                let key = suffixed_key(name, tag)?;
                append_values(&mut mapping, &key, tag);
            }
            name if MAP_KEYS.contains(&name) => {
                let key = suffixed_key(name, tag)?;
                let entry = ensure_mapping(&mut mapping, &key, tag);
                for attribute in &tag.attributes {
                    if attribute.name == "platform" {
                        continue;
                    }
                    entry.insert(
                        attribute.name.clone(),
                        attribute.name_span,
                        Node::Scalar(attribute.value.clone()),
                    );
                }
            }
            // unknown tags are carried through so strict mode can point at
            // them by name
            _ => {
                let node = match tag.values.as_slice() {
                    [one] => Node::Scalar(one.clone()),
                    values => Node::Sequence(Sequence::new(
                        values.iter().cloned().map(Node::Scalar).collect(),
                        tag.span,
                    )),
                };
                mapping.insert(tag.name.clone(), tag.name_span, node);
            }
        }
    }

    Ok(Node::Mapping(mapping))
}

/// The key a tag's values land under, honoring the `platform=` attribute.
fn suffixed_key(name: &str, tag: &SdlTag) -> BindResult<String> {
    match tag.attribute("platform") {
        Some(attribute) => {
            let spec = attribute.value.as_str();
            if spec.is_empty() {
                return Err(BindError::construction(
                    "platform",
                    "the platform attribute must not be empty",
                    attribute.value.span(),
                ));
            }
            Ok(format!("{name}-{spec}"))
        }
        None => Ok(name.to_string()),
    }
}

fn append_values(mapping: &mut Mapping, key: &str, tag: &SdlTag) {
    let mut items: Vec<Node> = match mapping.get(key) {
        Some(Node::Sequence(seq)) => seq.iter().cloned().collect(),
        _ => Vec::new(),
    };
    items.extend(tag.values.iter().cloned().map(Node::Scalar));
    mapping.insert(
        key.to_string(),
        tag.name_span,
        Node::Sequence(Sequence::new(items, tag.span)),
    );
}

fn ensure_mapping<'m>(mapping: &'m mut Mapping, key: &str, tag: &SdlTag) -> &'m mut Mapping {
    let existing = match mapping.get(key) {
        Some(Node::Mapping(m)) => m.clone(),
        _ => Mapping::new(tag.span),
    };
    mapping.insert(key.to_string(), tag.name_span, Node::Mapping(existing));
    match mapping.get_mut(key) {
        Some(Node::Mapping(m)) => m,
        _ => unreachable!("inserted a mapping above"),
    }
}

/// `dependency "name" version="…" path="…" optional=true` becomes one
/// entry of the `dependencies` mapping.
fn dependency_entry(mapping: &mut Mapping, tag: &SdlTag) -> BindResult<()> {
    let name = tag.single_value()?.clone();
    let deps = ensure_mapping(mapping, "dependencies", tag);

    let mut table = Mapping::new(tag.span);
    for attribute in &tag.attributes {
        table.insert(
            attribute.name.clone(),
            attribute.name_span,
            Node::Scalar(attribute.value.clone()),
        );
    }
    if table.is_empty() {
        return Err(BindError::construction(
            "dependency",
            format!("dependency `{}` needs a version, path or repository", name.as_str()),
            tag.span,
        ));
    }
    // the common single-attribute case collapses to the scalar form
    let node = if table.len() == 1 && table.contains_key("version") {
        table.get("version").cloned().expect("checked above")
    } else {
        Node::Mapping(table)
    };
    if deps.insert(name.as_str().to_string(), name.span(), node).is_some() {
        return Err(BindError::duplicate_key(name.as_str(), name.span()));
    }
    Ok(())
}

/// `configuration "name" { … }` appends to the `configurations` sequence.
fn configuration_entry(mapping: &mut Mapping, tag: &SdlTag) -> BindResult<()> {
    let name = tag.single_value()?.clone();
    let body = tags_to_mapping(&tag.children, tag.span)?;
    let Node::Mapping(mut body) = body else {
        unreachable!("tags_to_mapping returns a mapping")
    };
    body.insert("name".to_string(), name.span(), Node::Scalar(name));

    append_node(mapping, "configurations", tag, Node::Mapping(body));
    Ok(())
}

/// `subPackage "./path"` or `subPackage { … }` appends to `subPackages`.
fn subpackage_entry(mapping: &mut Mapping, tag: &SdlTag) -> BindResult<()> {
    let node = if tag.children.is_empty() {
        Node::Scalar(tag.single_value()?.clone())
    } else {
        tags_to_mapping(&tag.children, tag.span)?
    };
    append_node(mapping, "subPackages", tag, node);
    Ok(())
}

fn append_node(mapping: &mut Mapping, key: &str, tag: &SdlTag, node: Node) {
    let mut items: Vec<Node> = match mapping.get(key) {
        Some(Node::Sequence(seq)) => seq.iter().cloned().collect(),
        _ => Vec::new(),
    };
    items.push(node);
    mapping.insert(
        key.to_string(),
        tag.name_span,
        Node::Sequence(Sequence::new(items, tag.span)),
    );
}
