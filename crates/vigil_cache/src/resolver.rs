//! Static import scanning and dependency closure resolution.
//!
//! The resolver reads a target file, extracts its import/include statements,
//! maps each specifier to a project-owned file on disk, and repeats for the
//! discovered files breadth-first up to a depth limit. External packages are
//! never part of a closure.
//!
//! Resolution never fails. Anything the resolver cannot vouch for (unknown
//! syntax, unreadable files, imports that point nowhere, the depth frontier)
//! is reported as [`Unresolved`], which downgrades the caller's entry to
//! TTL-gated validity. At worst the resolver causes extra misses; it can never
//! make a stale entry look valid.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;
use vigil_config::{ResolverSettings, VigilConfig};

static SCRIPT_FROM: OnceLock<Regex> = OnceLock::new();
static SCRIPT_SIDE_EFFECT: OnceLock<Regex> = OnceLock::new();
static SCRIPT_CALL: OnceLock<Regex> = OnceLock::new();
static PY_FROM: OnceLock<Regex> = OnceLock::new();
static PY_IMPORT: OnceLock<Regex> = OnceLock::new();
static C_INCLUDE: OnceLock<Regex> = OnceLock::new();

/// `import x from '...'`, `import type {..} from '...'`, `export * from '...'`
fn script_from() -> &'static Regex {
    SCRIPT_FROM.get_or_init(|| {
        Regex::new(r#"\bfrom\s*['"]([^'"\n]+)['"]"#).expect("static regex is valid")
    })
}

/// `import './polyfill'`
fn script_side_effect() -> &'static Regex {
    SCRIPT_SIDE_EFFECT.get_or_init(|| {
        Regex::new(r#"(?m)^\s*import\s*['"]([^'"\n]+)['"]"#).expect("static regex is valid")
    })
}

/// `require('...')` and dynamic `import('...')`
fn script_call() -> &'static Regex {
    SCRIPT_CALL.get_or_init(|| {
        Regex::new(r#"\b(?:require|import)\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#)
            .expect("static regex is valid")
    })
}

fn py_from() -> &'static Regex {
    PY_FROM.get_or_init(|| {
        Regex::new(r"(?m)^\s*from\s+(\.*)([\w.]*)\s+import\b").expect("static regex is valid")
    })
}

fn py_import() -> &'static Regex {
    PY_IMPORT.get_or_init(|| {
        Regex::new(r"(?m)^\s*import\s+([\w.]+(?:\s+as\s+\w+)?(?:\s*,\s*[\w.]+(?:\s+as\s+\w+)?)*)")
            .expect("static regex is valid")
    })
}

fn c_include() -> &'static Regex {
    C_INCLUDE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*#\s*include\s*"([^"\n]+)""#).expect("static regex is valid")
    })
}

/// Source families the scanner understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    /// JavaScript / TypeScript.
    Script,
    Python,
    /// C and C++ (quoted includes only).
    CFamily,
    /// Files that cannot import anything (JSON, CSS, snapshots...).
    Data,
}

fn language_of(path: &Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "ts" | "tsx" | "mts" | "cts" | "js" | "jsx" | "mjs" | "cjs" => Some(Language::Script),
        "py" | "pyi" => Some(Language::Python),
        "c" | "h" | "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => Some(Language::CFamily),
        "json" | "css" | "scss" | "sass" | "less" | "yaml" | "yml" | "toml" | "txt" | "md"
        | "svg" | "csv" | "snap" | "graphql" | "gql" | "html" => Some(Language::Data),
        _ => None,
    }
}

/// One import statement extracted from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Import {
    Script(String),
    Python { level: usize, module: String },
    Include(String),
}

impl Import {
    fn specifier(&self) -> String {
        match self {
            Import::Script(s) | Import::Include(s) => s.clone(),
            Import::Python { level, module } => format!("{}{module}", ".".repeat(*level)),
        }
    }
}

/// Where an import specifier points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// A project-owned file that belongs in the closure.
    Local(PathBuf),
    /// A package dependency or standard library module; not tracked.
    External,
    /// A project-relative specifier with no file behind it.
    Missing,
}

/// Why part of a closure could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedKind {
    /// The file type is unknown or its content is not valid UTF-8.
    Unparseable,
    /// The file could not be read while scanning.
    Unreadable,
    /// A project-relative import does not resolve to an existing file.
    Missing {
        /// The specifier as written in the source.
        specifier: String,
    },
    /// The file sits at the depth limit and has imports that were not followed.
    DepthLimit,
}

impl fmt::Display for UnresolvedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedKind::Unparseable => f.write_str("unparseable"),
            UnresolvedKind::Unreadable => f.write_str("unreadable"),
            UnresolvedKind::Missing { specifier } => write!(f, "missing import '{specifier}'"),
            UnresolvedKind::DepthLimit => f.write_str("depth limit reached"),
        }
    }
}

/// A file whose imports could not be fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    /// The file being scanned when the problem occurred.
    pub file: PathBuf,
    /// What went wrong.
    pub kind: UnresolvedKind,
}

/// The dependency closure of one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Project files the target depends on, in breadth-first discovery order.
    /// The target itself is never included.
    pub dependencies: Vec<PathBuf>,
    /// Parts of the closure that could not be resolved.
    pub unresolved: Vec<Unresolved>,
    /// Candidate files tried and found absent before an import settled on
    /// its file or on an external package. Creating any of them would change
    /// where that import points.
    pub absent_candidates: Vec<PathBuf>,
}

impl Resolution {
    /// Returns `true` if every import in the closure was resolved.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Returns `true` if the result may be reused while no scanned file's
    /// content changes. Missing and unreadable files can appear without any
    /// hashed file changing, so those resolutions are recomputed every time.
    pub fn is_memoizable(&self) -> bool {
        !self.unresolved.iter().any(|u| {
            matches!(
                u.kind,
                UnresolvedKind::Missing { .. } | UnresolvedKind::Unreadable
            )
        })
    }

    /// Returns `true` if a file now exists where resolution found none, so
    /// the imports might resolve differently today.
    pub fn is_shadowed(&self) -> bool {
        self.absent_candidates.iter().any(|path| path.is_file())
    }
}

/// Discovers the project files a target's output depends on.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    root: PathBuf,
    max_depth: usize,
    extensions: Vec<String>,
    package_dirs: Vec<String>,
    /// Alias prefixes, longest first so the most specific alias wins.
    aliases: Vec<(String, String)>,
}

impl DependencyResolver {
    /// Creates a resolver for the project rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, max_depth: usize, settings: &ResolverSettings) -> Self {
        let mut aliases: Vec<(String, String)> = settings
            .aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self {
            root: normalize_path(&root.into()),
            max_depth,
            extensions: settings.extensions.clone(),
            package_dirs: settings.package_dirs.clone(),
            aliases,
        }
    }

    /// Creates a resolver from the `[cache]` and `[resolver]` configuration.
    pub fn from_config(root: impl Into<PathBuf>, config: &VigilConfig) -> Self {
        Self::new(root, config.cache.max_dependency_depth, &config.resolver)
    }

    /// The project root specifiers like `/lib/x` and aliases resolve against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Makes `path` absolute (relative to the project root) and removes
    /// `.` and `..` components without touching the filesystem.
    pub fn normalize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.root.join(path))
        }
    }

    /// Resolves the transitive dependency closure of `target`.
    pub fn resolve(&self, target: &Path) -> Resolution {
        let target = self.normalize(target);
        let mut resolution = Resolution::default();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();
        let mut absent: HashSet<PathBuf> = HashSet::new();
        visited.insert(target.clone());
        queue.push_back((target.clone(), 0));

        while let Some((file, depth)) = queue.pop_front() {
            let imports = match self.scan_file(&file) {
                Ok(imports) => imports,
                Err(kind) => {
                    resolution.unresolved.push(Unresolved { file, kind });
                    continue;
                }
            };

            let from_dir = file.parent().unwrap_or(&self.root).to_path_buf();
            let mut frontier_recorded = false;
            for import in imports {
                let mut misses = Vec::new();
                let target = self.resolve_import(&from_dir, &import, &mut misses);
                for miss in misses {
                    if absent.insert(miss.clone()) {
                        resolution.absent_candidates.push(miss);
                    }
                }
                match target {
                    Target::Local(dep) => {
                        if visited.contains(&dep) {
                            continue;
                        }
                        if depth >= self.max_depth {
                            if !frontier_recorded {
                                resolution.unresolved.push(Unresolved {
                                    file: file.clone(),
                                    kind: UnresolvedKind::DepthLimit,
                                });
                                frontier_recorded = true;
                            }
                            continue;
                        }
                        visited.insert(dep.clone());
                        resolution.dependencies.push(dep.clone());
                        queue.push_back((dep, depth + 1));
                    }
                    Target::External => {}
                    Target::Missing => resolution.unresolved.push(Unresolved {
                        file: file.clone(),
                        kind: UnresolvedKind::Missing {
                            specifier: import.specifier(),
                        },
                    }),
                }
            }
        }

        debug!(
            target = %target.display(),
            dependencies = resolution.dependencies.len(),
            unresolved = resolution.unresolved.len(),
            "resolved dependency closure"
        );
        resolution
    }

    /// Reads a file and extracts its imports.
    fn scan_file(&self, path: &Path) -> Result<Vec<Import>, UnresolvedKind> {
        let Some(language) = language_of(path) else {
            return Err(UnresolvedKind::Unparseable);
        };
        if language == Language::Data {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(path).map_err(|_| UnresolvedKind::Unreadable)?;
        let source = String::from_utf8(bytes).map_err(|_| UnresolvedKind::Unparseable)?;
        Ok(scan_source(&source, language))
    }

    /// Resolves one import. Candidate files tried and not found ahead of the
    /// outcome are appended to `misses`.
    fn resolve_import(
        &self,
        from_dir: &Path,
        import: &Import,
        misses: &mut Vec<PathBuf>,
    ) -> Target {
        match import {
            Import::Script(spec) => self.resolve_script(from_dir, spec, misses),
            Import::Python { level, module } => {
                self.resolve_python(from_dir, *level, module, misses)
            }
            Import::Include(spec) => self.resolve_include(from_dir, spec, misses),
        }
    }

    fn resolve_script(&self, from_dir: &Path, spec: &str, misses: &mut Vec<PathBuf>) -> Target {
        let spec = spec.split('?').next().unwrap_or(spec);
        let base = if spec == "." || spec == ".." || spec.starts_with("./") || spec.starts_with("../")
        {
            from_dir.join(spec)
        } else if Path::new(spec).is_absolute() && Path::new(spec).exists() {
            PathBuf::from(spec)
        } else if let Some(rest) = spec.strip_prefix('/') {
            self.root.join(rest)
        } else if let Some((prefix, target)) = self.alias_for(spec) {
            let rest = spec[prefix.len()..].trim_start_matches('/');
            self.root.join(target).join(rest)
        } else {
            return Target::External;
        };

        match self.locate_script(&normalize_path(&base), misses) {
            Some(path) => self.classify(path),
            None => Target::Missing,
        }
    }

    fn resolve_python(
        &self,
        from_dir: &Path,
        level: usize,
        module: &str,
        misses: &mut Vec<PathBuf>,
    ) -> Target {
        let module_path: PathBuf = module.split('.').filter(|s| !s.is_empty()).collect();

        if level > 0 {
            let mut base = from_dir.to_path_buf();
            for _ in 1..level {
                if !base.pop() {
                    return Target::Missing;
                }
            }
            if module_path.as_os_str().is_empty() {
                // `from . import x`: the package initializer, if there is one
                let init = base.join("__init__.py");
                return if init.is_file() {
                    self.classify(init)
                } else {
                    misses.push(init);
                    Target::External
                };
            }
            return match locate_python(&base.join(&module_path), misses) {
                Some(path) => self.classify(path),
                None => Target::Missing,
            };
        }

        // Absolute imports are project modules only if they exist under the
        // importing directory or the project root; otherwise stdlib/site-packages.
        for base in [
            from_dir.to_path_buf(),
            self.root.clone(),
            self.root.join("src"),
        ] {
            if let Some(path) = locate_python(&base.join(&module_path), misses) {
                return self.classify(path);
            }
        }
        Target::External
    }

    fn resolve_include(&self, from_dir: &Path, spec: &str, misses: &mut Vec<PathBuf>) -> Target {
        let candidates = [
            from_dir.to_path_buf(),
            self.root.clone(),
            self.root.join("include"),
        ]
        .map(|base| normalize_path(&base.join(spec)));
        match first_file(candidates, misses) {
            Some(path) => self.classify(path),
            None => Target::Missing,
        }
    }

    fn alias_for(&self, spec: &str) -> Option<(&str, &str)> {
        self.aliases
            .iter()
            .find(|(prefix, _)| spec.starts_with(prefix.as_str()))
            .map(|(p, t)| (p.as_str(), t.as_str()))
    }

    fn locate_script(&self, candidate: &Path, misses: &mut Vec<PathBuf>) -> Option<PathBuf> {
        let mut candidates = vec![candidate.to_path_buf()];
        // TypeScript ESM imports name the emitted `.js` file
        if let Some(ext) = candidate.extension().and_then(|e| e.to_str()) {
            if matches!(ext, "js" | "jsx" | "mjs" | "cjs") {
                candidates.extend(
                    ["ts", "tsx", "mts", "cts"]
                        .iter()
                        .map(|alt| candidate.with_extension(alt)),
                );
            }
        }
        candidates.extend(self.extensions.iter().map(|ext| append_extension(candidate, ext)));
        candidates.extend(
            self.extensions
                .iter()
                .map(|ext| candidate.join(format!("index.{ext}"))),
        );
        first_file(candidates, misses)
    }

    /// Files inside a package directory are external even when reached
    /// through a relative specifier.
    fn classify(&self, path: PathBuf) -> Target {
        let relative = path.strip_prefix(&self.root).unwrap_or(&path);
        let in_package_dir = relative.components().any(|c| match c {
            Component::Normal(name) => self
                .package_dirs
                .iter()
                .any(|dir| name == std::ffi::OsStr::new(dir)),
            _ => false,
        });
        if in_package_dir {
            Target::External
        } else {
            Target::Local(path)
        }
    }
}

fn locate_python(candidate: &Path, misses: &mut Vec<PathBuf>) -> Option<PathBuf> {
    if candidate.as_os_str().is_empty() {
        return None;
    }
    first_file(
        [
            append_extension(candidate, "py"),
            candidate.join("__init__.py"),
        ],
        misses,
    )
}

/// Returns the first candidate that is a file, recording the ones before it.
fn first_file(
    candidates: impl IntoIterator<Item = PathBuf>,
    misses: &mut Vec<PathBuf>,
) -> Option<PathBuf> {
    for candidate in candidates {
        if candidate.is_file() {
            return Some(candidate);
        }
        misses.push(candidate);
    }
    None
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Extracts import statements from source text.
fn scan_source(source: &str, language: Language) -> Vec<Import> {
    let mut imports = Vec::new();
    match language {
        Language::Script => {
            let code = strip_line_comments(source);
            for re in [script_from(), script_side_effect(), script_call()] {
                for cap in re.captures_iter(&code) {
                    let import = Import::Script(cap[1].to_string());
                    if !imports.contains(&import) {
                        imports.push(import);
                    }
                }
            }
        }
        Language::Python => {
            for cap in py_from().captures_iter(source) {
                imports.push(Import::Python {
                    level: cap[1].len(),
                    module: cap[2].to_string(),
                });
            }
            for cap in py_import().captures_iter(source) {
                for item in cap[1].split(',') {
                    if let Some(module) = item.split_whitespace().next() {
                        imports.push(Import::Python {
                            level: 0,
                            module: module.to_string(),
                        });
                    }
                }
            }
        }
        Language::CFamily => {
            for cap in c_include().captures_iter(source) {
                imports.push(Import::Include(cap[1].to_string()));
            }
        }
        Language::Data => {}
    }
    imports
}

/// Drops whole-line `//` and block-comment continuation lines so commented
/// imports are not followed.
fn strip_line_comments(source: &str) -> String {
    source
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.starts_with("//") || t.starts_with("/*") || t.starts_with('*'))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Removes `.` and `..` components lexically.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `..` at the filesystem root stays at the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
