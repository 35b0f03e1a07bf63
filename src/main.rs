//! Effect Stack - document inspector
//!
//! Loads a saved stack document into a stack bound to an in-memory filter
//! chain and prints the item tree and the live plant order.
//!
//! Usage: `effect-stack <document.xml>`

use std::cell::RefCell;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use effect_stack::effects::{service_ref, EffectNode, NoRefresh};
use effect_stack::telemetry::init_logging;
use effect_stack::{
    EffectContext, EffectRepository, EffectStack, FilterChain, ItemId, StackDocument, StackSettings, UndoStack,
};

fn print_rows(stack: &EffectStack, parent: ItemId) {
    let Some(item) = stack.tree().get(parent) else {
        return;
    };
    for (row, id) in item.children().iter().enumerate() {
        let indent = "  ".repeat(stack.tree().depth(*id));
        match stack.node(*id) {
            Some(EffectNode::Effect(effect)) => {
                let params: Vec<String> = effect
                    .all_parameters()
                    .iter()
                    .map(|p| format!("{}={}", p.name, p.value.encode()))
                    .collect();
                println!(
                    "{indent}{row}: [{id}] {} ({}){}{} {}",
                    effect.asset_id(),
                    effect.asset_type().name(),
                    if effect.is_enabled() { "" } else { " disabled" },
                    if effect.is_planted() { " planted" } else { "" },
                    params.join(" ")
                );
            }
            Some(EffectNode::Group(group)) => {
                println!("{indent}{row}: [{id}] group '{}'", group.label);
                print_rows(stack, *id);
            }
            None => {}
        }
    }
}

fn main() -> ExitCode {
    let settings = StackSettings::load();
    let _log_guard = match init_logging(&settings.log_config()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("Usage: effect-stack <document.xml>");
        return ExitCode::from(2);
    };

    let mut repository = EffectRepository::with_builtin();
    if let Some(catalog) = settings.catalog_path() {
        match repository.load_catalog_file(&catalog) {
            Ok(count) => tracing::info!(path = %catalog.display(), count, "Catalog loaded"),
            Err(e) => tracing::warn!(path = %catalog.display(), error = %e, "Failed to load catalog"),
        }
    }

    let document = match StackDocument::load_from_file(&path) {
        Ok(document) => document,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to read document");
            return ExitCode::FAILURE;
        }
    };

    let chain = FilterChain::shared();
    let history = Rc::new(RefCell::new(UndoStack::new(settings.undo_limit)));
    let context = EffectContext::new(Rc::new(repository), history, Rc::new(NoRefresh));
    let stack = EffectStack::construct(service_ref(&chain), document.owner, context);

    if let Err(e) = stack.borrow_mut().load_document(&document) {
        tracing::error!(path = %path.display(), error = %e, "Failed to load document");
        return ExitCode::FAILURE;
    }
    EffectStack::flush(&stack);

    let stack = stack.borrow();
    println!(
        "{} ({}, {} items)",
        stack.owner(),
        if stack.is_effect_stack_enabled() { "enabled" } else { "bypassed" },
        stack.tree().len()
    );
    print_rows(&stack, ItemId::ROOT);

    let order: Vec<String> = chain
        .borrow()
        .filters()
        .iter()
        .map(|f| format!("{}{}", f.asset_id, if f.disabled { "(off)" } else { "" }))
        .collect();
    println!("plant order: {}", order.join(" -> "));
    ExitCode::SUCCESS
}
