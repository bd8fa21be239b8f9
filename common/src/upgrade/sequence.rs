use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

use super::builder::build_grouping;
use super::context::UpgradeContext;
use super::grouping::UpgradePack;
use super::task::Task;
use super::wrapper::StageWrapper;

/// Un grupo del plan ya compilado, listo para convertirse en stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeGroupHolder {
    pub name: String,
    pub title: String,
    pub skippable: bool,
    pub allow_retry: bool,
    pub supports_auto_skip_on_failure: bool,
    pub items: Vec<StageWrapper>,
}

/// Compila el pack completo en el orden que corresponde a la dirección.
/// Los grupos que no producen stages no aparecen en el resultado.
pub fn create_sequence(pack: &UpgradePack, ctx: &UpgradeContext) -> Result<Vec<UpgradeGroupHolder>> {
    let mut groups = Vec::new();

    for grouping in pack.groups(ctx.direction) {
        let options = grouping.options();
        let mut items = build_grouping(pack, grouping, ctx)?;
        if items.is_empty() {
            debug!("grupo {} sin stages, se descarta", options.name);
            continue;
        }

        for item in &mut items {
            post_process(ctx, item);
        }

        groups.push(UpgradeGroupHolder {
            name: options.name.clone(),
            title: token_replace(ctx, &options.title, None, None),
            // en downgrade siempre se puede saltear
            skippable: options.skippable || ctx.direction.is_downgrade(),
            allow_retry: options.allow_retry,
            supports_auto_skip_on_failure: options.supports_auto_skip_on_failure,
            items,
        });
    }

    info!(
        "pack {} compilado: {} grupos, {} stages ({:?} a {})",
        pack.name,
        groups.len(),
        groups.iter().map(|g| g.items.len()).sum::<usize>(),
        ctx.direction,
        ctx.version
    );
    Ok(groups)
}

fn post_process(ctx: &UpgradeContext, stage: &mut StageWrapper) {
    stage.text = token_replace(ctx, &stage.text, None, None);

    for wrapper in &mut stage.tasks {
        let service = Some(wrapper.service.as_str()).filter(|s| !s.is_empty());
        let component = Some(wrapper.component.as_str()).filter(|c| !c.is_empty());

        for task in &mut wrapper.tasks {
            if let Some(summary) = task.summary_mut() {
                *summary = token_replace(ctx, summary, service, component);
            }
            if let Task::Manual(manual) = task {
                for message in &mut manual.messages {
                    *message = token_replace(ctx, message, service, component);
                }
            }
        }
    }
}

/// Reemplaza los `{{token}}` conocidos. Los que no se pueden resolver
/// quedan tal cual.
pub fn token_replace(
    ctx: &UpgradeContext,
    source: &str,
    service: Option<&str>,
    component: Option<&str>,
) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        match resolve_token(ctx, after[..end].trim(), service, component) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

fn resolve_token(
    ctx: &UpgradeContext,
    token: &str,
    service: Option<&str>,
    component: Option<&str>,
) -> Option<String> {
    let d = ctx.direction;
    let value = match token {
        "version" => ctx.version.clone(),
        "direction" | "direction.text" => d.text(false),
        "direction.text.proper" => d.text(true),
        "direction.past" => d.past(false),
        "direction.past.proper" => d.past(true),
        "direction.plural" => d.plural(false),
        "direction.plural.proper" => d.plural(true),
        "direction.verb" => d.verb(false),
        "direction.verb.proper" => d.verb(true),
        "hosts.all" => ctx.topology.hosts_for(service?, component?)?.hosts.join(", "),
        "hosts.master" => ctx.topology.hosts_for(service?, component?)?.master.clone()?,
        _ => return None,
    };
    Some(value)
}
