//! Arma los `StageWrapper` de cada grouping a partir del pack y la topología.
//!
//! Default y Colocated acumulan componentes con [`StageWrapperBuilder::add`]
//! y emiten todo en `build`; Cluster, ServiceCheck y HostOrder no dependen de
//! los componentes del pack y se construyen de una.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::context::{HostsType, UpgradeContext};
use super::grouping::{
    ClusterGrouping, ColocatedGrouping, DefaultGrouping, Grouping, HostOrderGrouping,
    HostOrderItem, OrderService, ProcessingComponent, ServiceCheckGrouping, UpgradePack,
};
use super::task::{ExecuteHostType, Task, TaskType};
use super::wrapper::{buckets, StageWrapper, StageWrapperType, TaskWrapper};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pre,
    Main,
    Post,
}

fn phases(ctx: &UpgradeContext, pc: &ProcessingComponent) -> [(Phase, Vec<Task>); 3] {
    [
        (Phase::Pre, pc.pre_tasks(ctx.direction).to_vec()),
        (Phase::Main, pc.tasks.clone()),
        (Phase::Post, pc.post_tasks(ctx.direction).to_vec()),
    ]
}

fn verb(stage_type: StageWrapperType, phase: Phase) -> &'static str {
    match (stage_type, phase) {
        (StageWrapperType::Restart, _) => "Restarting",
        (StageWrapperType::Start, _) => "Starting",
        (StageWrapperType::Stop, _) => "Stopping",
        (StageWrapperType::ServiceCheck, _) => "Service Check",
        (_, Phase::Pre) => "Preparing",
        (_, Phase::Post) => "Completing",
        (StageWrapperType::Configure, Phase::Main) => "Configuring",
        (_, Phase::Main) => "Executing",
    }
}

/// "Restarting DATANODE on host3" o "Restarting DATANODE on 5 hosts".
fn title(verb: &str, subject: &str, hosts: &[String]) -> String {
    match hosts {
        [host] => format!("{} {} on {}", verb, subject, host),
        _ => format!("{} {} on {} hosts", verb, subject, hosts.len()),
    }
}

fn server_side_text(stage_type: StageWrapperType, phase: Phase, component: &str, tasks: &[TaskWrapper]) -> String {
    tasks
        .iter()
        .flat_map(|w| w.tasks.iter())
        .find_map(Task::summary)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} {}", verb(stage_type, phase), component))
}

fn resolve_hosts(task: &Task, service: &str, component: &str, hosts: &HostsType) -> Result<Vec<String>> {
    match task.execute_hosts() {
        ExecuteHostType::All => Ok(hosts.hosts.clone()),
        ExecuteHostType::Any => Ok(hosts
            .master
            .clone()
            .or_else(|| hosts.hosts.first().cloned())
            .into_iter()
            .collect()),
        ExecuteHostType::Master => {
            hosts
                .master
                .clone()
                .map(|m| vec![m])
                .ok_or_else(|| Error::UnresolvableHosts {
                    service: service.to_string(),
                    component: component.to_string(),
                    reason: "el task pide el master y el componente no tiene".to_string(),
                })
        }
    }
}

/// Un wrapper por task; los no secuenciales consecutivos con los mismos
/// hosts se juntan.
fn task_wrappers(
    tasks: &[Task],
    service: &str,
    component: &str,
    hosts: &HostsType,
    params: &BTreeMap<String, String>,
) -> Result<Vec<TaskWrapper>> {
    let mut wrappers: Vec<TaskWrapper> = Vec::new();
    for task in tasks {
        let targets = resolve_hosts(task, service, component, hosts)?;
        if targets.is_empty() {
            continue;
        }

        match wrappers.last_mut() {
            Some(last) if !last.is_sequential() && !task.is_sequential() && last.hosts == targets => {
                last.tasks.push(task.clone());
            }
            _ => wrappers.push(
                TaskWrapper::new(service, component, targets, vec![task.clone()])
                    .with_params(params.clone()),
            ),
        }
    }
    Ok(wrappers)
}

/// Un wrapper secuencial va solo; los demás contiguos comparten stage.
fn split_by_sequential(wrappers: Vec<TaskWrapper>) -> Vec<Vec<TaskWrapper>> {
    let mut chunks = Vec::new();
    let mut current: Vec<TaskWrapper> = Vec::new();
    for wrapper in wrappers {
        if wrapper.is_sequential() {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(vec![wrapper]);
        } else {
            current.push(wrapper);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn restrict_to(wrappers: &[TaskWrapper], batch: &[String]) -> Vec<TaskWrapper> {
    wrappers
        .iter()
        .filter_map(|w| {
            let hosts: Vec<String> = w.hosts.iter().filter(|h| batch.contains(h)).cloned().collect();
            if hosts.is_empty() {
                return None;
            }
            let mut subset = w.clone();
            subset.hosts = hosts;
            Some(subset)
        })
        .collect()
}

fn union_hosts(wrappers: &[TaskWrapper]) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    for h in wrappers.iter().flat_map(|w| w.hosts.iter()) {
        if !hosts.contains(h) {
            hosts.push(h.clone());
        }
    }
    hosts
}

fn confirmation_gate(text: &str, message: &str, service: &str, component: &str, hosts: &[String]) -> StageWrapper {
    StageWrapper::new(
        StageWrapperType::Manual,
        text,
        vec![TaskWrapper::new(
            service,
            component,
            hosts.to_vec(),
            vec![Task::manual(text, vec![message.to_string()])],
        )],
    )
}

fn service_check_wrapper(ctx: &UpgradeContext, service: &str) -> Option<TaskWrapper> {
    let hosts = ctx.topology.service_hosts(service);
    if hosts.is_empty() {
        return None;
    }
    Some(TaskWrapper::new(service, "", hosts, vec![Task::service_check()]))
}

fn service_check_stage(ctx: &UpgradeContext, service: &str) -> Option<StageWrapper> {
    service_check_wrapper(ctx, service).map(|w| {
        StageWrapper::new(
            StageWrapperType::ServiceCheck,
            &format!("Service Check {}", service),
            vec![w],
        )
    })
}

/// Chequeos por grouping: solo en upgrade y solo en ROLLING.
fn grouping_checks_enabled(ctx: &UpgradeContext, service_check: bool) -> bool {
    service_check && ctx.direction.is_upgrade() && ctx.is_rolling()
}

pub trait StageWrapperBuilder {
    #[allow(clippy::too_many_arguments)]
    fn add(
        &mut self,
        ctx: &UpgradeContext,
        service: &str,
        component: &str,
        hosts: &HostsType,
        client_only: bool,
        pc: &ProcessingComponent,
        params: &BTreeMap<String, String>,
    ) -> Result<()>;

    fn build(self, ctx: &UpgradeContext) -> Result<Vec<StageWrapper>>;
}

/* --------- Default --------- */

pub struct DefaultBuilder<'a> {
    grouping: &'a DefaultGrouping,
    stages: Vec<StageWrapper>,
    services: Vec<String>,
}

impl<'a> DefaultBuilder<'a> {
    pub fn new(grouping: &'a DefaultGrouping) -> Self {
        Self {
            grouping,
            stages: Vec::new(),
            services: Vec::new(),
        }
    }

    /// Tandas de hosts y si la primera necesita confirmación.
    fn host_batches(&self, hosts: &[String]) -> Result<(Vec<Vec<String>>, bool)> {
        if let Some(cap) = self
            .grouping
            .parallel_scheduler
            .map(|p| p.max_degree_of_parallelism)
            .filter(|max| *max > 0)
        {
            return Ok((hosts.chunks(cap).map(<[String]>::to_vec).collect(), false));
        }

        match &self.grouping.batch {
            Some(batch) => Ok((batch.split(hosts)?, batch.requires_confirmation())),
            None => Ok((vec![hosts.to_vec()], false)),
        }
    }

    fn emit(
        &mut self,
        stage_type: StageWrapperType,
        phase: Phase,
        service: &str,
        component: &str,
        wrappers: Vec<TaskWrapper>,
    ) -> Result<()> {
        // las acciones de server no se parten en tandas
        if stage_type.is_server_side() {
            let text = server_side_text(stage_type, phase, component, &wrappers);
            self.stages.push(StageWrapper::new(stage_type, &text, wrappers));
            return Ok(());
        }

        let hosts = union_hosts(&wrappers);
        let (batches, gated) = self.host_batches(&hosts)?;
        let total = batches.len();

        for (i, batch) in batches.iter().enumerate() {
            let subset = restrict_to(&wrappers, batch);
            if subset.is_empty() {
                continue;
            }
            let text = title(verb(stage_type, phase), component, batch);
            self.stages.push(StageWrapper::new(stage_type, &text, subset));

            if gated && i == 0 && total > 1 {
                let message = format!(
                    "{{{{direction.text.proper}}}} of {} finished on {} of {} hosts. Confirm to continue with the remaining hosts.",
                    component,
                    batch.len(),
                    hosts.len()
                );
                self.stages.push(confirmation_gate(
                    &format!("Confirm {{{{direction.text}}}} of {}", component),
                    &message,
                    service,
                    component,
                    &hosts,
                ));
            }
        }
        Ok(())
    }
}

impl StageWrapperBuilder for DefaultBuilder<'_> {
    fn add(
        &mut self,
        ctx: &UpgradeContext,
        service: &str,
        component: &str,
        hosts: &HostsType,
        client_only: bool,
        pc: &ProcessingComponent,
        params: &BTreeMap<String, String>,
    ) -> Result<()> {
        if hosts.hosts.is_empty() {
            debug!("{}/{} sin hosts, no genera stages", service, component);
            return Ok(());
        }

        for (phase, tasks) in phases(ctx, pc) {
            for bucket in buckets(&tasks) {
                let wrappers = task_wrappers(&bucket.tasks, service, component, hosts, params)?;
                for chunk in split_by_sequential(wrappers) {
                    self.emit(bucket.stage_type, phase, service, component, chunk)?;
                }
            }
        }

        if !client_only && !self.services.iter().any(|s| s == service) {
            self.services.push(service.to_string());
        }
        Ok(())
    }

    fn build(mut self, ctx: &UpgradeContext) -> Result<Vec<StageWrapper>> {
        if grouping_checks_enabled(ctx, self.grouping.service_check) {
            for service in &self.services {
                if let Some(stage) = service_check_stage(ctx, service) {
                    self.stages.push(stage);
                }
            }
        }
        Ok(self.stages)
    }
}

/* --------- Colocated --------- */

#[derive(Debug, Clone)]
struct TaskProxy {
    service: String,
    component: String,
    stage_type: StageWrapperType,
    phase: Phase,
    tasks: Vec<Task>,
    params: BTreeMap<String, String>,
}

type HostProxies = Vec<(String, Vec<TaskProxy>)>;

fn host_entry<'b>(batch: &'b mut HostProxies, host: &str) -> &'b mut Vec<TaskProxy> {
    let idx = match batch.iter().position(|(h, _)| h == host) {
        Some(idx) => idx,
        None => {
            batch.push((host.to_string(), Vec::new()));
            batch.len() - 1
        }
    };
    &mut batch[idx].1
}

/// Por host, en orden: los proxies consecutivos del mismo tipo comparten stage.
fn proxies_to_stages(batch: &HostProxies) -> Vec<StageWrapper> {
    let mut stages = Vec::new();

    for (host, proxies) in batch {
        let mut runs: Vec<(StageWrapperType, Phase, Vec<TaskWrapper>)> = Vec::new();
        for proxy in proxies {
            let hosts = if proxy.stage_type.is_server_side() {
                Vec::new()
            } else {
                vec![host.clone()]
            };
            let wrapper = TaskWrapper::new(&proxy.service, &proxy.component, hosts, proxy.tasks.clone())
                .with_params(proxy.params.clone());

            match runs.last_mut() {
                Some((stage_type, phase, wrappers))
                    if *stage_type == proxy.stage_type
                        && *phase == proxy.phase
                        && !stage_type.is_server_side() =>
                {
                    wrappers.push(wrapper)
                }
                _ => runs.push((proxy.stage_type, proxy.phase, vec![wrapper])),
            }
        }

        for (stage_type, phase, wrappers) in runs {
            let components: Vec<&str> = wrappers.iter().map(|w| w.component.as_str()).collect();
            let text = if stage_type.is_server_side() {
                server_side_text(stage_type, phase, &components.join(", "), &wrappers)
            } else {
                title(verb(stage_type, phase), &components.join(", "), std::slice::from_ref(host))
            };
            stages.push(StageWrapper::new(stage_type, &text, wrappers));
        }
    }
    stages
}

pub struct ColocatedBuilder<'a> {
    grouping: &'a ColocatedGrouping,
    initial: HostProxies,
    finals: HostProxies,
    services: Vec<String>,
}

impl<'a> ColocatedBuilder<'a> {
    pub fn new(grouping: &'a ColocatedGrouping) -> Self {
        Self {
            grouping,
            initial: Vec::new(),
            finals: Vec::new(),
            services: Vec::new(),
        }
    }
}

impl StageWrapperBuilder for ColocatedBuilder<'_> {
    fn add(
        &mut self,
        ctx: &UpgradeContext,
        service: &str,
        component: &str,
        hosts: &HostsType,
        client_only: bool,
        pc: &ProcessingComponent,
        params: &BTreeMap<String, String>,
    ) -> Result<()> {
        if hosts.hosts.is_empty() {
            return Ok(());
        }
        let initial_count = self.grouping.batch.initial_batch_size(hosts.hosts.len());
        let phases = phases(ctx, pc);

        for (i, host) in hosts.hosts.iter().enumerate() {
            let batch = if i < initial_count {
                &mut self.initial
            } else {
                &mut self.finals
            };
            let proxies = host_entry(batch, host);

            for (phase, tasks) in &phases {
                for bucket in buckets(tasks) {
                    // las acciones de server van una sola vez, con el primer host
                    let server_side = bucket.stage_type.is_server_side();
                    if server_side && i > 0 {
                        continue;
                    }

                    let mut selected = Vec::new();
                    for task in &bucket.tasks {
                        let targets = resolve_hosts(task, service, component, hosts)?;
                        if server_side || targets.contains(host) {
                            selected.push(task.clone());
                        }
                    }
                    if selected.is_empty() {
                        continue;
                    }

                    proxies.push(TaskProxy {
                        service: service.to_string(),
                        component: component.to_string(),
                        stage_type: bucket.stage_type,
                        phase: *phase,
                        tasks: selected,
                        params: params.clone(),
                    });
                }
            }
        }

        if !client_only && !self.services.iter().any(|s| s == service) {
            self.services.push(service.to_string());
        }
        Ok(())
    }

    fn build(self, ctx: &UpgradeContext) -> Result<Vec<StageWrapper>> {
        let mut stages = proxies_to_stages(&self.initial);
        let finals = proxies_to_stages(&self.finals);

        if !stages.is_empty() && !finals.is_empty() {
            let initial_hosts: Vec<String> = self.initial.iter().map(|(h, _)| h.clone()).collect();
            let message = self.grouping.batch_message.clone().unwrap_or_else(|| {
                format!(
                    "{{{{direction.text.proper}}}} of the initial batch finished on {} hosts. Confirm to continue with the final batch.",
                    initial_hosts.len()
                )
            });
            stages.push(confirmation_gate(
                &format!("Confirm {}", self.grouping.options.title),
                &message,
                "",
                "",
                &initial_hosts,
            ));
        }
        stages.extend(finals);

        if grouping_checks_enabled(ctx, self.grouping.service_check) {
            let checks: Vec<TaskWrapper> = self
                .services
                .iter()
                .filter_map(|s| service_check_wrapper(ctx, s))
                .collect();
            if !checks.is_empty() {
                let names: Vec<&str> = checks.iter().map(|w| w.service.as_str()).collect();
                let text = format!("Service Check {}", names.join(", "));
                stages.push(StageWrapper::new(StageWrapperType::ServiceCheck, &text, checks));
            }
        }
        Ok(stages)
    }
}

/* --------- Cluster / ServiceCheck / HostOrder --------- */

/// Un manual suelto en un cluster grouping es su propio stage de confirmación.
fn cluster_stage_type(task_type: TaskType) -> StageWrapperType {
    match task_type {
        TaskType::Manual => StageWrapperType::Manual,
        other => other.stage_wrapper_type(),
    }
}

fn build_cluster(grouping: &ClusterGrouping, ctx: &UpgradeContext) -> Result<Vec<StageWrapper>> {
    let mut stages = Vec::new();

    for es in &grouping.execute_stages {
        if es.direction.is_some_and(|d| d != ctx.direction) {
            continue;
        }
        let task_type = es.task.task_type();

        match (es.service.as_deref(), es.component.as_deref()) {
            (Some(service), Some(component)) => {
                let Some(hosts) = ctx.topology.hosts_for(service, component) else {
                    debug!("execute-stage {:?}: {}/{} no instalado", es.title, service, component);
                    continue;
                };
                let targets = resolve_hosts(&es.task, service, component, hosts)?;
                if targets.is_empty() {
                    continue;
                }
                stages.push(StageWrapper::new(
                    cluster_stage_type(task_type),
                    &es.title,
                    vec![TaskWrapper::new(service, component, targets, vec![es.task.clone()])],
                ));
            }
            (Some(service), None) if task_type.is_server_side() => {
                if !ctx.topology.is_installed(service) {
                    continue;
                }
                stages.push(StageWrapper::new(
                    cluster_stage_type(task_type),
                    &es.title,
                    vec![TaskWrapper::new(service, "", Vec::new(), vec![es.task.clone()])],
                ));
            }
            (None, None) => {
                let stage_type = match task_type {
                    t if t.is_server_side() => cluster_stage_type(t),
                    other => {
                        return Err(Error::InvalidUpgradePack(format!(
                            "execute-stage {:?}: un task {:?} necesita servicio y componente",
                            es.title, other
                        )))
                    }
                };
                stages.push(StageWrapper::new(
                    stage_type,
                    &es.title,
                    vec![TaskWrapper::new("", "", Vec::new(), vec![es.task.clone()])],
                ));
            }
            _ => {
                return Err(Error::InvalidUpgradePack(format!(
                    "execute-stage {:?}: servicio y componente incompletos",
                    es.title
                )))
            }
        }
    }
    Ok(stages)
}

/// Prioridades primero, después el resto en orden alfabético.
fn build_service_checks(grouping: &ServiceCheckGrouping, ctx: &UpgradeContext) -> Vec<StageWrapper> {
    let eligible = |s: &str| {
        ctx.topology.is_installed(s)
            && !ctx.topology.is_client_only(s)
            && !grouping.excludes.iter().any(|e| e == s)
    };

    let mut ordered: Vec<&str> = Vec::new();
    let rest = ctx.topology.services.keys().map(String::as_str);
    for service in grouping.priorities.iter().map(String::as_str).chain(rest) {
        if eligible(service) && !ordered.contains(&service) {
            ordered.push(service);
        }
    }

    ordered
        .into_iter()
        .filter_map(|s| service_check_stage(ctx, s))
        .collect()
}

fn build_host_order(grouping: &HostOrderGrouping, ctx: &UpgradeContext) -> Result<Vec<StageWrapper>> {
    let mut stages = Vec::new();

    for item in &grouping.items {
        match item {
            HostOrderItem::Hosts { hosts } => {
                for host in hosts {
                    if !ctx.topology.has_host(host) {
                        return Err(Error::UnresolvableHosts {
                            service: String::new(),
                            component: String::new(),
                            reason: format!("el host {} no está en la topología", host),
                        });
                    }

                    let components: Vec<(String, String)> = ctx
                        .topology
                        .components_on_host(host)
                        .into_iter()
                        .filter(|(s, _)| !ctx.topology.is_client_only(s))
                        .collect();
                    if components.is_empty() {
                        continue;
                    }

                    let on_host = |task: fn() -> Task, reverse: bool| -> Vec<TaskWrapper> {
                        let mut wrappers: Vec<TaskWrapper> = components
                            .iter()
                            .map(|(s, c)| TaskWrapper::new(s, c, vec![host.clone()], vec![task()]))
                            .collect();
                        if reverse {
                            wrappers.reverse();
                        }
                        wrappers
                    };

                    stages.push(StageWrapper::new(
                        StageWrapperType::Stop,
                        &format!("Stopping components on {}", host),
                        on_host(Task::stop, true),
                    ));
                    stages.push(StageWrapper::new(
                        StageWrapperType::Restart,
                        &format!("Restarting components on {}", host),
                        on_host(Task::restart, false),
                    ));
                }
            }
            HostOrderItem::ServiceChecks { services } => {
                for service in services {
                    if !ctx.topology.is_installed(service) || ctx.topology.is_client_only(service) {
                        continue;
                    }
                    stages.extend(service_check_stage(ctx, service));
                }
            }
        }
    }
    Ok(stages)
}

/* --------- Dispatcher --------- */

/// Con `function` los componentes sin tareas en el pack reciben un
/// stop/start/restart armado al vuelo.
fn resolve_processing(
    pack: &UpgradePack,
    service: &str,
    component: &str,
    function: Option<TaskType>,
) -> Option<ProcessingComponent> {
    let defined = pack.processing_component(service, component).cloned();
    match function {
        None => defined,
        Some(TaskType::Stop) => Some(ProcessingComponent::with_tasks(vec![Task::stop()])),
        Some(TaskType::Start) => {
            defined.or_else(|| Some(ProcessingComponent::with_tasks(vec![Task::start()])))
        }
        Some(TaskType::Restart) => {
            defined.or_else(|| Some(ProcessingComponent::with_tasks(vec![Task::restart()])))
        }
        Some(other) => {
            warn!("función {:?} no soportada en un grouping, se usan las tareas del pack", other);
            defined
        }
    }
}

/// NameNode con HA: en ROLLING primero el standby y después el activo; en
/// NON_ROLLING dos pasadas, cada una con el rol que tiene que tomar.
fn namenode_passes(
    ctx: &UpgradeContext,
    service: &str,
    component: &str,
    hosts: &HostsType,
) -> Vec<(HostsType, BTreeMap<String, String>)> {
    let is_namenode = service.eq_ignore_ascii_case("HDFS") && component.eq_ignore_ascii_case("NAMENODE");

    match (is_namenode, &hosts.master, &hosts.secondary) {
        (true, Some(master), Some(secondary)) if ctx.is_rolling() => vec![(
            HostsType {
                hosts: vec![secondary.clone(), master.clone()],
                ..hosts.clone()
            },
            BTreeMap::new(),
        )],
        (true, Some(master), Some(secondary)) => {
            let pass = |host: &String, role: &str, is_master: bool| {
                (
                    HostsType {
                        hosts: vec![host.clone()],
                        master: is_master.then(|| host.clone()),
                        secondary: (!is_master).then(|| host.clone()),
                    },
                    BTreeMap::from([("desired_namenode_role".to_string(), role.to_string())]),
                )
            };
            vec![pass(master, "active", true), pass(secondary, "standby", false)]
        }
        _ => vec![(hosts.clone(), BTreeMap::new())],
    }
}

fn add_components<B: StageWrapperBuilder>(
    builder: &mut B,
    pack: &UpgradePack,
    services: &[OrderService],
    function: Option<TaskType>,
    ctx: &UpgradeContext,
) -> Result<()> {
    let mut ordered: Vec<&OrderService> = services.iter().collect();
    // rolling downgrade: servicios al revés
    if ctx.is_rolling() && ctx.direction.is_downgrade() {
        ordered.reverse();
    }

    for service in ordered {
        let name = service.service_name.as_str();
        if !ctx.topology.is_installed(name) {
            debug!("servicio {} no instalado, se saltea", name);
            continue;
        }
        let client_only = ctx.topology.is_client_only(name);

        for component in &service.components {
            let Some(hosts) = ctx.topology.hosts_for(name, component) else {
                continue;
            };
            let Some(pc) = resolve_processing(pack, name, component, function) else {
                debug!("sin tareas para {}/{}, se saltea", name, component);
                continue;
            };

            for (hosts, params) in namenode_passes(ctx, name, component, hosts) {
                builder.add(ctx, name, component, &hosts, client_only, &pc, &params)?;
            }
        }
    }
    Ok(())
}

pub fn build_grouping(
    pack: &UpgradePack,
    grouping: &Grouping,
    ctx: &UpgradeContext,
) -> Result<Vec<StageWrapper>> {
    match grouping {
        Grouping::Default(g) => {
            if let Some(batch) = &g.batch {
                batch.validate()?;
            }
            let mut builder = DefaultBuilder::new(g);
            add_components(&mut builder, pack, &g.services, g.function, ctx)?;
            builder.build(ctx)
        }
        Grouping::Colocated(g) => {
            g.batch.validate()?;
            let mut builder = ColocatedBuilder::new(g);
            add_components(&mut builder, pack, &g.services, None, ctx)?;
            builder.build(ctx)
        }
        Grouping::Cluster(g) => build_cluster(g, ctx),
        Grouping::ServiceCheck(g) => Ok(build_service_checks(g, ctx)),
        Grouping::HostOrder(g) => build_host_order(g, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::batch::Batch;
    use crate::upgrade::context::{ClusterTopology, Direction, ServiceTopology, UpgradeType};
    use crate::upgrade::grouping::{ExecuteStage, GroupingOptions, ParallelScheduler};
    use crate::upgrade::task::{ConfigureTask, ExecuteTask};
    use pretty_assertions::assert_eq;

    fn hosts(names: &[&str]) -> HostsType {
        HostsType::new(names)
    }

    fn topology() -> ClusterTopology {
        let mut services = BTreeMap::new();

        let mut hdfs = ServiceTopology::default();
        hdfs.components.insert(
            "NAMENODE".into(),
            HostsType {
                hosts: vec!["h1".into(), "h2".into()],
                master: Some("h1".into()),
                secondary: Some("h2".into()),
            },
        );
        hdfs.components
            .insert("DATANODE".into(), hosts(&["h1", "h2", "h3", "h4", "h5"]));
        hdfs.components.insert("JOURNALNODE".into(), hosts(&[]));
        services.insert("HDFS".to_string(), hdfs);

        let mut yarn = ServiceTopology::default();
        yarn.components
            .insert("NODEMANAGER".into(), hosts(&["h1", "h2", "h3"]));
        yarn.components
            .insert("RESOURCEMANAGER".into(), hosts(&["h3"]));
        services.insert("YARN".to_string(), yarn);

        let mut zk = ServiceTopology::default();
        zk.components
            .insert("ZOOKEEPER_SERVER".into(), hosts(&["h1", "h2", "h3"]));
        services.insert("ZOOKEEPER".to_string(), zk);

        let mut pig = ServiceTopology {
            client_only: true,
            ..ServiceTopology::default()
        };
        pig.components.insert("PIG".into(), hosts(&["h1"]));
        services.insert("PIG".to_string(), pig);

        ClusterTopology {
            cluster_name: "c1".into(),
            services,
        }
    }

    fn pack(groups: Vec<Grouping>) -> UpgradePack {
        let restart = || ProcessingComponent::with_tasks(vec![Task::restart()]);
        let mut processing: BTreeMap<String, BTreeMap<String, ProcessingComponent>> = BTreeMap::new();
        for (service, component) in [
            ("HDFS", "NAMENODE"),
            ("HDFS", "DATANODE"),
            ("HDFS", "JOURNALNODE"),
            ("YARN", "NODEMANAGER"),
            ("YARN", "RESOURCEMANAGER"),
            ("ZOOKEEPER", "ZOOKEEPER_SERVER"),
            ("PIG", "PIG"),
        ] {
            processing
                .entry(service.to_string())
                .or_default()
                .insert(component.to_string(), restart());
        }

        UpgradePack {
            name: "test".into(),
            target_version: Some("2.3.0.0".into()),
            upgrade_type: UpgradeType::Rolling,
            skip_failures: false,
            groups,
            processing,
        }
    }

    fn ctx(pack: &UpgradePack, direction: Direction) -> UpgradeContext {
        UpgradeContext::new(pack, topology(), direction).unwrap()
    }

    fn default_grouping(services: Vec<OrderService>) -> DefaultGrouping {
        DefaultGrouping::new(GroupingOptions::new("CORE", "Core"), services)
    }

    fn build(pack: &UpgradePack, direction: Direction) -> Result<Vec<StageWrapper>> {
        build_grouping(pack, &pack.groups[0], &ctx(pack, direction))
    }

    fn texts(stages: &[StageWrapper]) -> Vec<String> {
        stages.iter().map(|s| s.text.clone()).collect()
    }

    #[test]
    fn restart_with_service_check() {
        let g = default_grouping(vec![OrderService::new("HDFS", &["DATANODE"])]);
        let pack = pack(vec![Grouping::Default(g)]);

        let stages = build(&pack, Direction::Upgrade).unwrap();
        assert_eq!(
            texts(&stages),
            vec!["Restarting DATANODE on 5 hosts", "Service Check HDFS"]
        );
        assert_eq!(stages[0].stage_type, StageWrapperType::Restart);
        assert_eq!(stages[1].stage_type, StageWrapperType::ServiceCheck);
        assert_eq!(stages[1].tasks[0].service, "HDFS");
    }

    #[test]
    fn percent_batches_and_single_host_titles() {
        let mut g = default_grouping(vec![
            OrderService::new("HDFS", &["DATANODE"]),
            OrderService::new("YARN", &["RESOURCEMANAGER"]),
        ]);
        g.batch = Some(Batch::Percent { percent: 50 });
        g.service_check = false;
        let pack = pack(vec![Grouping::Default(g)]);

        let stages = build(&pack, Direction::Upgrade).unwrap();
        assert_eq!(
            texts(&stages),
            vec![
                "Restarting DATANODE on 3 hosts",
                "Restarting DATANODE on 2 hosts",
                "Restarting RESOURCEMANAGER on h3",
            ]
        );
        assert_eq!(stages[0].hosts(), vec!["h1", "h2", "h3"]);
        assert_eq!(stages[1].hosts(), vec!["h4", "h5"]);
    }

    #[test]
    fn parallel_scheduler_caps_batch_size() {
        let mut g = default_grouping(vec![OrderService::new("HDFS", &["DATANODE"])]);
        g.parallel_scheduler = Some(ParallelScheduler {
            max_degree_of_parallelism: 2,
        });
        g.batch = Some(Batch::Percent { percent: 100 });
        g.service_check = false;
        let pack = pack(vec![Grouping::Default(g)]);

        let stages = build(&pack, Direction::Upgrade).unwrap();
        let sizes: Vec<usize> = stages.iter().map(|s| s.hosts().len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn conditional_batch_inserts_manual_gate() {
        let mut g = default_grouping(vec![OrderService::new("HDFS", &["DATANODE"])]);
        g.batch = Some(Batch::Conditional {
            initial_percent: 20,
            remaining_percent: 100,
        });
        g.service_check = false;
        let pack = pack(vec![Grouping::Default(g)]);

        let stages = build(&pack, Direction::Upgrade).unwrap();
        let types: Vec<StageWrapperType> = stages.iter().map(|s| s.stage_type).collect();
        assert_eq!(
            types,
            vec![
                StageWrapperType::Restart,
                StageWrapperType::Manual,
                StageWrapperType::Restart
            ]
        );
        assert_eq!(stages[0].text, "Restarting DATANODE on h1");
        assert_eq!(stages[2].text, "Restarting DATANODE on 4 hosts");
    }

    #[test]
    fn pre_and_post_tasks_follow_bucket_and_sequential_rules() {
        let mut pack = pack(vec![Grouping::Default(default_grouping(vec![
            OrderService::new("HDFS", &["DATANODE"]),
        ]))]);
        let sequential = Task::Execute(ExecuteTask {
            command: "drain".into(),
            sequential: true,
            ..ExecuteTask::default()
        });
        let configure = Task::Configure(ConfigureTask {
            summary: Some("Update hdfs-site".into()),
            ..ConfigureTask::default()
        });
        pack.processing.get_mut("HDFS").unwrap().insert(
            "DATANODE".into(),
            ProcessingComponent {
                pre_upgrade: vec![Task::execute("a"), Task::execute("b"), sequential, configure],
                pre_downgrade: None,
                tasks: vec![Task::restart()],
                post_upgrade: vec![Task::execute("c")],
                post_downgrade: None,
            },
        );

        let stages = build(&pack, Direction::Upgrade).unwrap();
        assert_eq!(
            texts(&stages),
            vec![
                "Preparing DATANODE on 5 hosts",
                "Preparing DATANODE on 5 hosts",
                "Update hdfs-site",
                "Restarting DATANODE on 5 hosts",
                "Completing DATANODE on 5 hosts",
                "Service Check HDFS",
            ]
        );
        // a y b comparten wrapper; el secuencial va solo
        assert_eq!(stages[0].tasks.len(), 1);
        assert_eq!(stages[0].tasks[0].tasks.len(), 2);
        assert_eq!(stages[1].tasks[0].tasks.len(), 1);
        assert_eq!(stages[2].stage_type, StageWrapperType::ServerSideAction);
    }

    #[test]
    fn master_targeting_without_master_fails() {
        let mut pack = pack(vec![Grouping::Default(default_grouping(vec![
            OrderService::new("HDFS", &["DATANODE"]),
        ]))]);
        let on_master = Task::Execute(ExecuteTask {
            command: "x".into(),
            hosts: ExecuteHostType::Master,
            ..ExecuteTask::default()
        });
        pack.processing
            .get_mut("HDFS")
            .unwrap()
            .insert("DATANODE".into(), ProcessingComponent::with_tasks(vec![on_master]));

        assert!(matches!(
            build(&pack, Direction::Upgrade),
            Err(Error::UnresolvableHosts { .. })
        ));
    }

    #[test]
    fn any_targeting_prefers_master() {
        let mut pack = pack(vec![Grouping::Default(default_grouping(vec![
            OrderService::new("HDFS", &["NAMENODE"]),
        ]))]);
        let any = Task::Execute(ExecuteTask {
            command: "x".into(),
            hosts: ExecuteHostType::Any,
            ..ExecuteTask::default()
        });
        pack.processing
            .get_mut("HDFS")
            .unwrap()
            .insert("NAMENODE".into(), ProcessingComponent::with_tasks(vec![any]));

        let stages = build(&pack, Direction::Upgrade).unwrap();
        assert_eq!(stages[0].text, "Executing NAMENODE on h1");
    }

    #[test]
    fn all_and_any_tasks_on_one_host_both_run() {
        let mut pack = pack(vec![Grouping::Default(default_grouping(vec![
            OrderService::new("HDFS", &["DATANODE"]),
        ]))]);
        let any = Task::Execute(ExecuteTask {
            command: "b".into(),
            hosts: ExecuteHostType::Any,
            ..ExecuteTask::default()
        });
        pack.processing.get_mut("HDFS").unwrap().insert(
            "DATANODE".into(),
            ProcessingComponent {
                pre_upgrade: vec![Task::execute("a"), any],
                pre_downgrade: None,
                tasks: vec![Task::restart()],
                post_upgrade: Vec::new(),
                post_downgrade: None,
            },
        );

        let wrappers = build(&pack, Direction::Upgrade).unwrap();
        assert_eq!(wrappers[0].text, "Preparing DATANODE on 5 hosts");
        assert_eq!(wrappers[0].tasks.len(), 2);

        let holder = crate::upgrade::sequence::UpgradeGroupHolder {
            name: "CORE".into(),
            title: "Core".into(),
            skippable: false,
            allow_retry: true,
            supports_auto_skip_on_failure: false,
            items: wrappers,
        };
        let stages = crate::upgrade::stages::StageFactory::new("c1", "server")
            .create_stages(1, &[holder], false)
            .unwrap();

        let on_h1 = stages[0].host_action("h1").unwrap();
        assert_eq!(on_h1.role_commands.len(), 1);
        let params = &on_h1.role_commands[0].params;
        assert_eq!(params.get("0.command").map(String::as_str), Some("a"));
        assert_eq!(params.get("1.command").map(String::as_str), Some("b"));

        let on_h3 = stages[0].host_action("h3").unwrap().command("DATANODE").unwrap();
        assert_eq!(on_h3.params.get("command").map(String::as_str), Some("a"));
        assert_eq!(on_h3.params.len(), 1);
    }

    #[test]
    fn missing_hosts_and_components_produce_nothing() {
        let g = default_grouping(vec![
            OrderService::new("HDFS", &["JOURNALNODE", "SECONDARY_NAMENODE"]),
            OrderService::new("HBASE", &["HBASE_MASTER"]),
        ]);
        let pack = pack(vec![Grouping::Default(g)]);
        assert!(build(&pack, Direction::Upgrade).unwrap().is_empty());
    }

    #[test]
    fn client_only_services_get_no_service_check() {
        let g = default_grouping(vec![OrderService::new("PIG", &["PIG"])]);
        let pack = pack(vec![Grouping::Default(g)]);
        assert_eq!(
            texts(&build(&pack, Direction::Upgrade).unwrap()),
            vec!["Restarting PIG on h1"]
        );
    }

    #[test]
    fn rolling_downgrade_reverses_services_and_skips_checks() {
        let g = default_grouping(vec![
            OrderService::new("ZOOKEEPER", &["ZOOKEEPER_SERVER"]),
            OrderService::new("YARN", &["NODEMANAGER"]),
        ]);
        let pack = pack(vec![Grouping::Default(g)]);

        assert_eq!(
            texts(&build(&pack, Direction::Downgrade).unwrap()),
            vec![
                "Restarting NODEMANAGER on 3 hosts",
                "Restarting ZOOKEEPER_SERVER on 3 hosts"
            ]
        );
    }

    #[test]
    fn non_rolling_disables_grouping_service_checks() {
        let g = default_grouping(vec![OrderService::new("YARN", &["NODEMANAGER"])]);
        let mut pack = pack(vec![Grouping::Default(g)]);
        pack.upgrade_type = UpgradeType::NonRolling;

        assert_eq!(
            texts(&build(&pack, Direction::Upgrade).unwrap()),
            vec!["Restarting NODEMANAGER on 3 hosts"]
        );
    }

    #[test]
    fn stop_function_synthesizes_tasks() {
        let mut g = default_grouping(vec![OrderService::new("YARN", &["NODEMANAGER"])]);
        g.function = Some(TaskType::Stop);
        g.service_check = false;
        let mut pack = pack(vec![Grouping::Default(g)]);
        pack.processing.clear();

        let stages = build(&pack, Direction::Upgrade).unwrap();
        assert_eq!(texts(&stages), vec!["Stopping NODEMANAGER on 3 hosts"]);
        assert_eq!(stages[0].stage_type, StageWrapperType::Stop);
    }

    #[test]
    fn namenode_standby_goes_first_in_rolling() {
        let mut g = default_grouping(vec![OrderService::new("HDFS", &["NAMENODE"])]);
        g.parallel_scheduler = Some(ParallelScheduler {
            max_degree_of_parallelism: 1,
        });
        g.service_check = false;
        let pack = pack(vec![Grouping::Default(g)]);

        assert_eq!(
            texts(&build(&pack, Direction::Upgrade).unwrap()),
            vec!["Restarting NAMENODE on h2", "Restarting NAMENODE on h1"]
        );
    }

    #[test]
    fn namenode_roles_in_non_rolling() {
        let mut g = default_grouping(vec![OrderService::new("HDFS", &["NAMENODE"])]);
        g.service_check = false;
        let mut pack = pack(vec![Grouping::Default(g)]);
        pack.upgrade_type = UpgradeType::NonRolling;

        let stages = build(&pack, Direction::Upgrade).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].hosts(), vec!["h1"]);
        assert_eq!(
            stages[0].tasks[0].params.get("desired_namenode_role").map(String::as_str),
            Some("active")
        );
        assert_eq!(
            stages[1].tasks[0].params.get("desired_namenode_role").map(String::as_str),
            Some("standby")
        );
    }

    #[test]
    fn colocated_initial_gate_final_then_one_check() {
        let g = ColocatedGrouping {
            options: GroupingOptions::new("SLAVES", "Slave Components"),
            services: vec![
                OrderService::new("HDFS", &["DATANODE"]),
                OrderService::new("YARN", &["NODEMANAGER"]),
            ],
            service_check: true,
            batch: Batch::Percent { percent: 34 },
            batch_message: None,
        };
        let pack = pack(vec![Grouping::Colocated(g)]);

        let stages = build(&pack, Direction::Upgrade).unwrap();
        assert_eq!(
            texts(&stages),
            vec![
                "Restarting DATANODE, NODEMANAGER on h1",
                "Restarting DATANODE, NODEMANAGER on h2",
                "Confirm Slave Components",
                "Restarting DATANODE, NODEMANAGER on h3",
                "Restarting DATANODE on h4",
                "Restarting DATANODE on h5",
                "Service Check HDFS, YARN",
            ]
        );
        assert_eq!(stages[2].stage_type, StageWrapperType::Manual);
        assert_eq!(stages[6].tasks.len(), 2);
    }

    #[test]
    fn cluster_grouping_stages() {
        let g = ClusterGrouping {
            options: GroupingOptions::new("PRE", "Pre Upgrade"),
            execute_stages: vec![
                ExecuteStage {
                    title: "Confirm backups".into(),
                    id: None,
                    service: None,
                    component: None,
                    direction: None,
                    task: Task::manual("Backup", vec!["Back up the database".into()]),
                },
                ExecuteStage {
                    title: "Save namespace".into(),
                    id: Some("hdfs-save".into()),
                    service: Some("HDFS".into()),
                    component: Some("NAMENODE".into()),
                    direction: Some(Direction::Upgrade),
                    task: Task::Execute(ExecuteTask {
                        command: "save".into(),
                        hosts: ExecuteHostType::Master,
                        ..ExecuteTask::default()
                    }),
                },
                ExecuteStage {
                    title: "Not installed".into(),
                    id: None,
                    service: Some("HBASE".into()),
                    component: Some("HBASE_MASTER".into()),
                    direction: None,
                    task: Task::execute("x"),
                },
            ],
        };
        let pack = pack(vec![Grouping::Cluster(g)]);

        let up = build(&pack, Direction::Upgrade).unwrap();
        assert_eq!(texts(&up), vec!["Confirm backups", "Save namespace"]);
        assert_eq!(up[0].stage_type, StageWrapperType::Manual);
        assert_eq!(up[1].stage_type, StageWrapperType::RuTasks);
        assert_eq!(up[1].hosts(), vec!["h1"]);

        let down = build(&pack, Direction::Downgrade).unwrap();
        assert_eq!(texts(&down), vec!["Confirm backups"]);
    }

    #[test]
    fn cluster_execute_without_scope_is_invalid() {
        let g = ClusterGrouping {
            options: GroupingOptions::new("PRE", "Pre"),
            execute_stages: vec![ExecuteStage {
                title: "Bad".into(),
                id: None,
                service: None,
                component: None,
                direction: None,
                task: Task::execute("x"),
            }],
        };
        let pack = pack(vec![Grouping::Cluster(g)]);
        assert!(matches!(
            build(&pack, Direction::Upgrade),
            Err(Error::InvalidUpgradePack(_))
        ));
    }

    #[test]
    fn service_check_grouping_order() {
        let g = ServiceCheckGrouping {
            options: GroupingOptions::new("CHECKS", "All Service Checks"),
            priorities: vec!["YARN".into(), "HBASE".into()],
            excludes: vec!["ZOOKEEPER".into()],
        };
        let pack = pack(vec![Grouping::ServiceCheck(g)]);

        assert_eq!(
            texts(&build(&pack, Direction::Upgrade).unwrap()),
            vec!["Service Check YARN", "Service Check HDFS"]
        );
    }

    #[test]
    fn host_order_stops_in_reverse_then_restarts() {
        let g = HostOrderGrouping {
            options: GroupingOptions::new("HOSTS", "Host Ordered"),
            items: vec![
                HostOrderItem::Hosts {
                    hosts: vec!["h4".into(), "h3".into()],
                },
                HostOrderItem::ServiceChecks {
                    services: vec!["HDFS".into(), "PIG".into()],
                },
            ],
        };
        let pack = pack(vec![Grouping::HostOrder(g)]);

        let stages = build(&pack, Direction::Upgrade).unwrap();
        assert_eq!(
            texts(&stages),
            vec![
                "Stopping components on h4",
                "Restarting components on h4",
                "Stopping components on h3",
                "Restarting components on h3",
                "Service Check HDFS",
            ]
        );

        let stop_order: Vec<&str> = stages[2].tasks.iter().map(|t| t.component.as_str()).collect();
        let restart_order: Vec<&str> = stages[3].tasks.iter().map(|t| t.component.as_str()).collect();
        assert_eq!(
            stop_order,
            vec!["ZOOKEEPER_SERVER", "RESOURCEMANAGER", "NODEMANAGER", "DATANODE"]
        );
        assert_eq!(
            restart_order,
            vec!["DATANODE", "NODEMANAGER", "RESOURCEMANAGER", "ZOOKEEPER_SERVER"]
        );
    }

    #[test]
    fn host_order_unknown_host_fails() {
        let g = HostOrderGrouping {
            options: GroupingOptions::new("HOSTS", "Host Ordered"),
            items: vec![HostOrderItem::Hosts {
                hosts: vec!["h99".into()],
            }],
        };
        let pack = pack(vec![Grouping::HostOrder(g)]);
        assert!(matches!(
            build(&pack, Direction::Upgrade),
            Err(Error::UnresolvableHosts { .. })
        ));
    }
}
