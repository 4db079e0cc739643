//! Path resolution, enumeration and pattern queries
//!
//! Paths are `/`-joined names starting with the archive name. The root
//! segment is compared case-insensitively and may omit the 3-character
//! extension; every later segment is exact. Enumeration is depth-first
//! pre-order and its order is stable: wildcard and regex queries filter it
//! rather than walk the tree themselves.

use regex::Regex;
use std::sync::Arc;

use crate::wz::archive::{Directory, WzArchive};
use crate::wz::error::WzResult;
use crate::wz::object::WzObject;
use crate::wz::property::{BITMAP_SEGMENT, PropertyValue, WzProperty, find_named};

/// Materialized path paired with the node it addresses
pub type PathEntry<'a> = (String, WzObject<'a>);

impl WzArchive {
    /// Resolve a slash-delimited path
    ///
    /// Returns `Ok(None)` as soon as a segment does not match. Only a
    /// released archive is an error.
    pub fn resolve(&self, path: &str) -> WzResult<Option<WzObject<'_>>> {
        let root = self.root()?;
        let mut segments = path.split('/');
        if !segments
            .next()
            .is_some_and(|first| root_matches(self.name(), first))
        {
            return Ok(None);
        }

        let mut current = WzObject::Directory(root);
        for segment in segments {
            match step(&current, segment)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Every node of the archive in enumeration order, root first
    pub fn list_all(&self) -> WzResult<Vec<PathEntry<'_>>> {
        let root = self.root()?;
        self.objects_under(root)
    }

    /// `directory` and everything below it, in enumeration order
    pub fn objects_under<'a>(&'a self, directory: Directory<'a>) -> WzResult<Vec<PathEntry<'a>>> {
        let mut out = Vec::new();
        let mut path = directory.path()?;
        visit_directory(directory, &mut path, &mut out)?;
        Ok(out)
    }

    /// Nodes whose path matches a `*` wildcard pattern
    pub fn wildcard_query(&self, pattern: &str) -> WzResult<Vec<PathEntry<'_>>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|(path, _)| wildcard_match(pattern, path))
            .collect())
    }

    /// Nodes whose path matches a regular expression anywhere
    pub fn regex_query(&self, pattern: &str) -> WzResult<Vec<PathEntry<'_>>> {
        let regex = Regex::new(pattern)?;
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|(path, _)| regex.is_match(path))
            .collect())
    }
}

/// Match `candidate` against `pattern`, where `*` matches zero or more characters
///
/// Both ends are anchored. Runs in `O(pattern * candidate)` time without
/// recursion or allocation: on a mismatch the most recent `*` absorbs one
/// more character and matching resumes after it.
pub fn wildcard_match(pattern: &str, candidate: &str) -> bool {
    let (p, c) = (pattern.as_bytes(), candidate.as_bytes());
    let (mut pi, mut ci) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ci < c.len() {
        if p.get(pi) == Some(&b'*') {
            star = Some((pi, ci));
            pi += 1;
        } else if p.get(pi) == Some(&c[ci]) {
            pi += 1;
            ci += 1;
        } else if let Some((star_pi, star_ci)) = star {
            pi = star_pi + 1;
            ci = star_ci + 1;
            star = Some((star_pi, star_ci + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|b| *b == b'*')
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Whether `segment` addresses the archive root
fn root_matches(name: &str, segment: &str) -> bool {
    if eq_ignore_case(name, segment) {
        return true;
    }
    name.char_indices()
        .rev()
        .nth(2)
        .is_some_and(|(cut, _)| eq_ignore_case(&name[..cut], segment))
}

/// Consume one path segment below `node`
fn step<'a>(node: &WzObject<'a>, segment: &str) -> WzResult<Option<WzObject<'a>>> {
    Ok(match node {
        WzObject::Directory(directory) => match directory.image(segment)? {
            Some(image) => Some(WzObject::Image(image)),
            None => directory.directory(segment)?.map(WzObject::Directory),
        },
        WzObject::Image(image) => image.property(segment)?.map(WzObject::Property),
        WzObject::Property(property) => match property.value() {
            PropertyValue::Canvas(canvas) => find_named(&canvas.children, segment)
                .map(WzObject::Property)
                .or_else(|| {
                    (segment == BITMAP_SEGMENT)
                        .then(|| WzObject::Bitmap(Arc::clone(&canvas.bitmap)))
                }),
            _ => property.child(segment).map(WzObject::Property),
        },
        WzObject::Bitmap(_) => None,
    })
}

fn push_segment(path: &mut String, segment: &str) -> usize {
    let len = path.len();
    path.push('/');
    path.push_str(segment);
    len
}

fn visit_directory<'a>(
    directory: Directory<'a>,
    path: &mut String,
    out: &mut Vec<PathEntry<'a>>,
) -> WzResult<()> {
    out.push((path.clone(), WzObject::Directory(directory)));

    for image in directory.images()? {
        let len = push_segment(path, image.name()?);
        out.push((path.clone(), WzObject::Image(image)));
        for property in image.properties()?.iter() {
            visit_property(property, path, out);
        }
        path.truncate(len);
    }

    for child in directory.directories()? {
        let len = push_segment(path, child.name()?);
        visit_directory(child, path, out)?;
        path.truncate(len);
    }
    Ok(())
}

fn visit_property<'a>(property: &Arc<WzProperty>, path: &mut String, out: &mut Vec<PathEntry<'a>>) {
    let len = push_segment(path, property.name());
    visit_node(property, path, out);
    path.truncate(len);
}

/// Emit `property` at `path`, then its descendants
fn visit_node<'a>(property: &Arc<WzProperty>, path: &mut String, out: &mut Vec<PathEntry<'a>>) {
    out.push((path.clone(), WzObject::Property(Arc::clone(property))));

    match property.value() {
        PropertyValue::SubProperty(children) => {
            for child in children {
                visit_property(child, path, out);
            }
        }
        PropertyValue::Canvas(canvas) => {
            for child in &canvas.children {
                visit_property(child, path, out);
            }
            let len = push_segment(path, BITMAP_SEGMENT);
            out.push((path.clone(), WzObject::Bitmap(Arc::clone(&canvas.bitmap))));
            path.truncate(len);
        }
        PropertyValue::Vector { x, y } => {
            visit_property(x, path, out);
            visit_property(y, path, out);
        }
        // Positional children share the convex's path
        PropertyValue::Convex(children) => {
            for child in children {
                visit_node(child, path, out);
            }
        }
        _ => {}
    }
}
