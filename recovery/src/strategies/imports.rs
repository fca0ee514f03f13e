//! Missing-import resolution.
//!
//! Looks for framework symbols a file uses without importing the module that
//! provides them, and adds the smallest set of `import` lines that covers
//! them. Symbols declared anywhere in the tree are never attributed to a
//! framework.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::core::rules::RuleTable;
use crate::core::source_text::{imported_modules, insert_import};
use crate::core::types::{Diagnostic, FixCandidate, SourceTree};
use crate::strategies::{PassContext, RecoveryStrategy, changed_only};

pub const IMPORT_STRATEGY_NAME: &str = "imports";

const IMPORT_CONFIDENCE: f32 = 0.8;

/// Module that provides each well-known symbol.
const KNOWN_SYMBOLS: &[(&str, &[&str])] = &[
    (
        "SwiftUI",
        &[
            "View", "Text", "Image", "Color", "VStack", "HStack", "ZStack", "Button", "List",
            "NavigationStack", "NavigationLink", "State", "Binding", "StateObject",
            "ObservedObject", "EnvironmentObject", "Environment", "App", "Scene",
            "WindowGroup", "Spacer", "Form", "Section", "Toggle", "TextField", "ForEach",
            "ScrollView", "LazyVStack", "LazyVGrid", "GridItem", "Picker", "Label", "Font",
            "Alert", "Sheet",
        ],
    ),
    (
        "Foundation",
        &[
            "Date", "URL", "UUID", "Data", "DateFormatter", "JSONDecoder", "JSONEncoder",
            "URLSession", "URLRequest", "NotificationCenter", "UserDefaults", "TimeInterval",
            "Calendar", "Locale", "FileManager", "Timer", "NSError", "Bundle",
        ],
    ),
    (
        "Combine",
        &[
            "ObservableObject", "Published", "AnyCancellable", "PassthroughSubject",
            "CurrentValueSubject", "Cancellable", "AnyPublisher",
        ],
    ),
    (
        "SwiftData",
        &["Model", "ModelContainer", "ModelContext", "Query", "FetchDescriptor"],
    ),
    (
        "MapKit",
        &["Map", "MapMarker", "MapAnnotation", "MKCoordinateRegion", "MKMapView"],
    ),
    (
        "CoreLocation",
        &["CLLocationManager", "CLLocationCoordinate2D", "CLLocation"],
    ),
    ("Charts", &["Chart", "BarMark", "LineMark", "PointMark", "AreaMark"]),
    (
        "UIKit",
        &["UIImage", "UIColor", "UIApplication", "UIViewController", "UIFont"],
    ),
];

/// Modules whose import makes another module's symbols visible.
const REEXPORTS: &[(&str, &[&str])] = &[
    ("SwiftUI", &["Foundation", "Combine"]),
    ("UIKit", &["Foundation"]),
    ("MapKit", &["CoreLocation"]),
];

static TYPE_IDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^.\w])(?P<ident>[A-Z]\w*)\b").expect("identifier regex should compile")
});

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:struct|class|enum|protocol|actor|typealias|func|let|var|case)\s+(?P<name>\w+)",
    )
    .expect("declaration regex should compile")
});

static STRING_OR_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)"(?:[^"\\]|\\.)*"|//[^\n]*|/\*.*?\*/"#)
        .expect("string/comment regex should compile")
});

pub struct ImportFixer<'a> {
    rules: &'a RuleTable,
}

impl<'a> ImportFixer<'a> {
    pub fn new(rules: &'a RuleTable) -> Self {
        Self { rules }
    }
}

impl RecoveryStrategy for ImportFixer<'_> {
    fn name(&self) -> &str {
        IMPORT_STRATEGY_NAME
    }

    fn try_fix(
        &self,
        _ctx: &PassContext<'_>,
        diagnostics: &[Diagnostic],
        tree: &SourceTree,
    ) -> Option<FixCandidate> {
        let mut hinted: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for diag in diagnostics {
            if !diag.is_error() || !diag.category.is_known() || !tree.contains(&diag.file) {
                continue;
            }
            let entry = hinted.entry(diag.file.as_str()).or_default();
            if let Some(ident) = self.rules.find(&diag.raw_message).and_then(|m| m.ident) {
                entry.insert(ident.to_string());
            }
        }
        if hinted.is_empty() {
            return None;
        }

        let declared = declared_names(tree);
        let mut changes = BTreeMap::new();
        for (path, hints) in hinted {
            let Some(source) = tree.get(path) else {
                continue;
            };
            let modules = missing_modules(source, hints, &declared);
            if modules.is_empty() {
                continue;
            }
            debug!(path, ?modules, "resolved missing imports");
            let updated = modules.iter().fold(source.to_string(), |acc, module| {
                insert_import(&acc, module).unwrap_or(acc)
            });
            changes.insert(path.to_string(), updated);
        }

        let changes = changed_only(changes, tree);
        if changes.is_empty() {
            return None;
        }
        Some(FixCandidate::patch(
            IMPORT_STRATEGY_NAME,
            changes,
            IMPORT_CONFIDENCE,
        ))
    }
}

fn module_for(symbol: &str) -> Option<&'static str> {
    KNOWN_SYMBOLS
        .iter()
        .find(|(_, symbols)| symbols.contains(&symbol))
        .map(|(module, _)| *module)
}

/// `module` plus everything it re-exports.
fn visible_through(module: &str) -> Vec<&str> {
    let mut visible = vec![module];
    if let Some((_, extra)) = REEXPORTS.iter().find(|(m, _)| *m == module) {
        visible.extend(extra.iter().copied());
    }
    visible
}

fn declared_names(tree: &SourceTree) -> BTreeSet<String> {
    tree.iter()
        .flat_map(|(_, content)| {
            DECLARATION
                .captures_iter(content)
                .map(|caps| caps["name"].to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Smallest set of modules to import so every used framework symbol resolves.
fn missing_modules(
    source: &str,
    hints: BTreeSet<String>,
    declared: &BTreeSet<String>,
) -> BTreeSet<&'static str> {
    let code = STRING_OR_COMMENT.replace_all(source, " ");
    let mut used = hints;
    used.extend(
        TYPE_IDENT
            .captures_iter(&code)
            .map(|caps| caps["ident"].to_string()),
    );

    let imported = imported_modules(source);
    let covered: BTreeSet<&str> = imported
        .iter()
        .flat_map(|m| visible_through(m))
        .collect();

    let needed: BTreeSet<&'static str> = used
        .iter()
        .filter(|ident| !declared.contains(*ident))
        .filter_map(|ident| module_for(ident))
        .filter(|module| !covered.contains(module))
        .collect();

    // Drop modules another needed module already re-exports.
    needed
        .iter()
        .copied()
        .filter(|module| {
            !needed
                .iter()
                .any(|other| other != module && visible_through(other).contains(module))
        })
        .collect()
}
