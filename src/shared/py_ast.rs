//! Thin helpers over the tree-sitter Python grammar. Parsing is cheap but
//! parser construction is not, so each thread keeps one parser alive.

use std::cell::RefCell;
use tree_sitter::{Node, Parser, Tree};

thread_local! {
    static PARSER: RefCell<Parser> = RefCell::new(make_parser());
}

fn make_parser() -> Parser {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .expect("Failed to load Python grammar");
    parser
}

pub fn parse(source: &str) -> Option<Tree> {
    PARSER.with(|parser| parser.borrow_mut().parse(source, None))
}

pub fn has_syntax_error(tree: &Tree) -> bool {
    tree.root_node().has_error()
}

/// 1-based line of the first ERROR or MISSING node, if any.
pub fn first_error_line(tree: &Tree) -> Option<usize> {
    let mut line = None;
    walk(tree.root_node(), &mut |node| {
        if line.is_none() && (node.is_error() || node.is_missing()) {
            line = Some(node.start_position().row + 1);
        }
    });
    line
}

/// Root modules named by import statements, e.g. `playwright` for
/// `from playwright.sync_api import Page`.
pub fn imported_modules(tree: &Tree, source: &str) -> Vec<String> {
    let bytes = source.as_bytes();
    let mut modules = Vec::new();
    walk(tree.root_node(), &mut |node| match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                let name = match child.kind() {
                    "dotted_name" => child.utf8_text(bytes).ok(),
                    "aliased_import" => child
                        .child_by_field_name("name")
                        .and_then(|n| n.utf8_text(bytes).ok()),
                    _ => None,
                };
                if let Some(name) = name {
                    modules.push(root_module(name));
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name") {
                if let Ok(name) = module.utf8_text(bytes) {
                    modules.push(root_module(name));
                }
            }
        }
        _ => {}
    });
    modules
}

/// Names of functions called directly by identifier, e.g. `eval` in `eval(x)`.
/// Attribute calls like `os.system(...)` are not reported here.
pub fn called_identifiers(tree: &Tree, source: &str) -> Vec<String> {
    let bytes = source.as_bytes();
    let mut names = Vec::new();
    walk(tree.root_node(), &mut |node| {
        if node.kind() == "call" {
            if let Some(function) = node.child_by_field_name("function") {
                if function.kind() == "identifier" {
                    if let Ok(name) = function.utf8_text(bytes) {
                        names.push(name.to_string());
                    }
                }
            }
        }
    });
    names
}

/// Lines of `while True:` loops whose body contains no `break`.
pub fn unbounded_loops(tree: &Tree, source: &str) -> Vec<usize> {
    let bytes = source.as_bytes();
    let mut lines = Vec::new();
    walk(tree.root_node(), &mut |node| {
        if node.kind() != "while_statement" {
            return;
        }
        let is_while_true = node
            .child_by_field_name("condition")
            .and_then(|c| c.utf8_text(bytes).ok())
            .map(|text| text.trim() == "True")
            .unwrap_or(false);
        if !is_while_true {
            return;
        }
        let mut has_break = false;
        walk(node, &mut |inner| {
            if inner.kind() == "break_statement" {
                has_break = true;
            }
        });
        if !has_break {
            lines.push(node.start_position().row + 1);
        }
    });
    lines
}

/// Full dotted text of attribute-style calls, e.g. `time.sleep`.
pub fn attribute_calls(tree: &Tree, source: &str) -> Vec<String> {
    let bytes = source.as_bytes();
    let mut names = Vec::new();
    walk(tree.root_node(), &mut |node| {
        if node.kind() == "call" {
            if let Some(function) = node.child_by_field_name("function") {
                if function.kind() == "attribute" {
                    if let Ok(name) = function.utf8_text(bytes) {
                        names.push(name.to_string());
                    }
                }
            }
        }
    });
    names
}

/// First `test_*` function name, used to title persisted test cases.
pub fn first_test_name(source: &str) -> Option<String> {
    let tree = parse(source)?;
    let bytes = source.as_bytes();
    let mut found = None;
    walk(tree.root_node(), &mut |node| {
        if found.is_some() || node.kind() != "function_definition" {
            return;
        }
        if let Some(name) = node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(bytes).ok())
        {
            if name.starts_with("test_") {
                found = Some(name.to_string());
            }
        }
    });
    found
}

fn root_module(dotted: &str) -> String {
    dotted.split('.').next().unwrap_or(dotted).trim().to_string()
}

fn walk<'a, F: FnMut(Node<'a>)>(node: Node<'a>, f: &mut F) {
    f(node);
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, f);
    }
}
