use std::collections::BTreeMap;
use tracing::debug;

use crate::error::Result;
use crate::stage::{RequestId, RoleCommand, Stage, StageId, UNBOUNDED_TIMEOUT_MS};

use super::sequence::UpgradeGroupHolder;
use super::task::Task;
use super::wrapper::{StageWrapper, StageWrapperType, TaskWrapper};

/// Convierte el plan compilado en stages del scheduler.
#[derive(Debug, Clone)]
pub struct StageFactory {
    pub cluster_name: String,
    /// Host donde corren las acciones de server y las confirmaciones manuales.
    pub server_host: String,
}

fn non_empty(s: &str) -> Option<String> {
    Some(s).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Parámetros de los wrappers más los de cada task que cae en un mismo
/// comando; con varios tasks se prefijan con su posición.
fn merged_params(entries: &[(&TaskWrapper, &Task)]) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let prefixed = entries.len() > 1;
    for (i, (tw, task)) in entries.iter().enumerate() {
        params.extend(tw.params.clone());
        for (k, v) in task.command_params() {
            let key = if prefixed { format!("{}.{}", i, k) } else { k };
            params.insert(key, v);
        }
    }
    params
}

fn wrapper_entries(tw: &TaskWrapper) -> Vec<(&TaskWrapper, &Task)> {
    tw.tasks.iter().map(|task| (tw, task)).collect()
}

impl StageFactory {
    pub fn new(cluster_name: &str, server_host: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            server_host: server_host.to_string(),
        }
    }

    /// Ids de stage consecutivos desde 1; los stages sin comandos no se emiten.
    pub fn create_stages(
        &self,
        request_id: RequestId,
        groups: &[UpgradeGroupHolder],
        skip_failures: bool,
    ) -> Result<Vec<Stage>> {
        let mut stages = Vec::new();
        let mut next_id: StageId = 1;

        for group in groups {
            let auto_skip = skip_failures && group.skippable && group.supports_auto_skip_on_failure;

            for wrapper in &group.items {
                for mut stage in self.stages_for(request_id, wrapper) {
                    if stage.is_empty() {
                        debug!("stage {:?} sin comandos, se omite", stage.request_context);
                        continue;
                    }
                    stage.skippable = group.skippable;
                    stage.auto_skip_on_failure = auto_skip;
                    stage.set_stage_id(next_id)?;
                    next_id += 1;
                    stages.push(stage);
                }
            }
        }
        Ok(stages)
    }

    fn stages_for(&self, request_id: RequestId, wrapper: &StageWrapper) -> Vec<Stage> {
        match wrapper.stage_type {
            StageWrapperType::ServerSideAction | StageWrapperType::Manual => {
                self.server_side_stages(request_id, wrapper)
            }
            StageWrapperType::ServiceCheck => vec![self.service_check_stage(request_id, wrapper)],
            other => {
                let role_command = match other {
                    StageWrapperType::Restart => RoleCommand::Restart,
                    StageWrapperType::Start => RoleCommand::Start,
                    StageWrapperType::Stop => RoleCommand::Stop,
                    _ => RoleCommand::Execute,
                };
                vec![self.host_stage(request_id, wrapper, role_command)]
            }
        }
    }

    /// Un stage por task, siempre en el host del server.
    fn server_side_stages(&self, request_id: RequestId, wrapper: &StageWrapper) -> Vec<Stage> {
        let mut stages = Vec::new();
        for tw in &wrapper.tasks {
            for task in &tw.tasks {
                let text = task.summary().unwrap_or(wrapper.text.as_str());
                let mut stage = Stage::new(request_id, &self.cluster_name, text);

                let (role, role_command) = match task {
                    Task::Manual(_) => ("MANUAL", RoleCommand::Manual),
                    _ => ("SERVER_ACTION", RoleCommand::ServerAction),
                };
                let cmd = stage.add_host_role_command(&self.server_host, role, role_command);
                cmd.service = non_empty(&tw.service);
                cmd.params = tw.params.clone();
                cmd.params.extend(task.command_params());
                if let Some(component) = non_empty(&tw.component) {
                    cmd.params.insert("component".into(), component);
                }

                // una confirmación espera al operador sin límite
                if role_command == RoleCommand::Manual {
                    stage.timeout_ms = Some(UNBOUNDED_TIMEOUT_MS);
                }
                stages.push(stage);
            }
        }
        stages
    }

    /// Un comando `<SERVICIO>_SERVICE_CHECK` por servicio, en su primer host.
    fn service_check_stage(&self, request_id: RequestId, wrapper: &StageWrapper) -> Stage {
        let mut stage = Stage::new(request_id, &self.cluster_name, &wrapper.text);
        for tw in &wrapper.tasks {
            let Some(host) = tw.hosts.first() else {
                continue;
            };
            let role = format!("{}_SERVICE_CHECK", tw.service);
            let cmd = stage.add_host_role_command(host, &role, RoleCommand::ServiceCheck);
            cmd.service = non_empty(&tw.service);
            cmd.params = merged_params(&wrapper_entries(tw));
        }
        stage
    }

    /// Un comando por (host, componente). Si varios wrappers apuntan al
    /// mismo host y componente, sus tasks se juntan en ese comando.
    fn host_stage(&self, request_id: RequestId, wrapper: &StageWrapper, role_command: RoleCommand) -> Stage {
        let mut slots: Vec<((&str, &str), Vec<(&TaskWrapper, &Task)>)> = Vec::new();
        for tw in &wrapper.tasks {
            for host in &tw.hosts {
                let key = (host.as_str(), tw.component.as_str());
                let idx = match slots.iter().position(|(k, _)| *k == key) {
                    Some(idx) => idx,
                    None => {
                        slots.push((key, Vec::new()));
                        slots.len() - 1
                    }
                };
                slots[idx].1.extend(wrapper_entries(tw));
            }
        }

        let mut stage = Stage::new(request_id, &self.cluster_name, &wrapper.text);
        for ((host, component), entries) in slots {
            let params = merged_params(&entries);
            let service = entries.first().and_then(|(tw, _)| non_empty(&tw.service));
            let cmd = stage.add_host_role_command(host, component, role_command);
            cmd.service = service;
            cmd.params = params;
        }
        stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::task::{ExecuteTask, ServerActionTask};
    use pretty_assertions::assert_eq;

    fn group(items: Vec<StageWrapper>) -> UpgradeGroupHolder {
        UpgradeGroupHolder {
            name: "CORE".into(),
            title: "Core".into(),
            skippable: true,
            allow_retry: true,
            supports_auto_skip_on_failure: true,
            items,
        }
    }

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|h| h.to_string()).collect()
    }

    fn factory() -> StageFactory {
        StageFactory::new("c1", "server")
    }

    #[test]
    fn host_stages_and_sequential_ids() {
        let groups = vec![
            group(vec![StageWrapper::new(
                StageWrapperType::Restart,
                "Restarting DATANODE on 2 hosts",
                vec![TaskWrapper::new("HDFS", "DATANODE", hosts(&["h1", "h2"]), vec![Task::restart()])],
            )]),
            group(vec![
                // sin hosts: no genera stage ni consume id
                StageWrapper::new(
                    StageWrapperType::RuTasks,
                    "Executing X on 0 hosts",
                    vec![TaskWrapper::new("HDFS", "X", Vec::new(), vec![Task::execute("x")])],
                ),
                StageWrapper::new(
                    StageWrapperType::ServiceCheck,
                    "Service Check HDFS",
                    vec![TaskWrapper::new("HDFS", "", hosts(&["h2", "h1"]), vec![Task::service_check()])],
                ),
            ]),
        ];

        let stages = factory().create_stages(7, &groups, false).unwrap();
        let ids: Vec<Option<StageId>> = stages.iter().map(|s| s.stage_id()).collect();
        assert_eq!(ids, vec![Some(1), Some(2)]);

        let restart = &stages[0];
        assert_eq!(restart.request_id, 7);
        assert_eq!(restart.hosts(), vec!["h1", "h2"]);
        let cmd = restart.host_action("h1").unwrap().command("DATANODE").unwrap();
        assert_eq!(cmd.role_command, RoleCommand::Restart);
        assert_eq!(cmd.service.as_deref(), Some("HDFS"));
        assert!(!restart.auto_skip_on_failure);

        let check = &stages[1];
        assert_eq!(check.hosts(), vec!["h2"]);
        let cmd = check.host_action("h2").unwrap().command("HDFS_SERVICE_CHECK").unwrap();
        assert_eq!(cmd.role_command, RoleCommand::ServiceCheck);
    }

    #[test]
    fn manual_and_server_actions_run_on_server_host() {
        let action = Task::ServerAction(ServerActionTask {
            summary: Some("Update config".into()),
            class_name: "ConfigureAction".into(),
            ..ServerActionTask::default()
        });
        let wrapper = StageWrapper::new(
            StageWrapperType::ServerSideAction,
            "Preparing HDFS",
            vec![TaskWrapper::new(
                "HDFS",
                "NAMENODE",
                hosts(&["h1"]),
                vec![Task::manual("Confirm", vec!["Back up first".into()]), action],
            )],
        );

        let stages = factory().create_stages(1, &[group(vec![wrapper])], true).unwrap();
        assert_eq!(stages.len(), 2);

        let manual = &stages[0];
        assert_eq!(manual.request_context, "Confirm");
        assert_eq!(manual.timeout_ms, Some(UNBOUNDED_TIMEOUT_MS));
        assert!(manual.auto_skip_on_failure);
        let cmd = manual.host_action("server").unwrap().command("MANUAL").unwrap();
        assert_eq!(cmd.role_command, RoleCommand::Manual);
        assert_eq!(cmd.params.get("messages").map(String::as_str), Some("Back up first"));
        assert_eq!(cmd.params.get("component").map(String::as_str), Some("NAMENODE"));

        let server = &stages[1];
        assert_eq!(server.timeout_ms, None);
        let cmd = server.host_action("server").unwrap().command("SERVER_ACTION").unwrap();
        assert_eq!(cmd.params.get("class_name").map(String::as_str), Some("ConfigureAction"));
    }

    #[test]
    fn auto_skip_needs_flag_and_group_support() {
        let wrapper = StageWrapper::new(
            StageWrapperType::Restart,
            "Restarting X on h1",
            vec![TaskWrapper::new("S", "X", hosts(&["h1"]), vec![Task::restart()])],
        );
        let mut g = group(vec![wrapper]);
        g.supports_auto_skip_on_failure = false;

        let stages = factory().create_stages(1, &[g], true).unwrap();
        assert!(stages[0].skippable);
        assert!(!stages[0].auto_skip_on_failure);
    }

    #[test]
    fn multiple_tasks_prefix_params() {
        let second = Task::Execute(ExecuteTask {
            command: "b".into(),
            retry_count: 2,
            ..ExecuteTask::default()
        });
        let wrapper = StageWrapper::new(
            StageWrapperType::RuTasks,
            "Executing X on h1",
            vec![TaskWrapper::new("S", "X", hosts(&["h1"]), vec![Task::execute("a"), second])
                .with_params(BTreeMap::from([("desired_namenode_role".to_string(), "active".to_string())]))],
        );

        let stages = factory().create_stages(1, &[group(vec![wrapper])], false).unwrap();
        let cmd = stages[0].host_action("h1").unwrap().command("X").unwrap();
        assert_eq!(cmd.role_command, RoleCommand::Execute);

        let keys: Vec<&str> = cmd.params.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["0.command", "1.command", "1.retry_count", "desired_namenode_role"]
        );
    }

    #[test]
    fn wrappers_on_same_host_share_one_command() {
        let wrapper = StageWrapper::new(
            StageWrapperType::RuTasks,
            "Preparing X on 2 hosts",
            vec![
                TaskWrapper::new("S", "X", hosts(&["h1", "h2"]), vec![Task::execute("a")]),
                TaskWrapper::new("S", "X", hosts(&["h1"]), vec![Task::execute("b")]),
            ],
        );

        let stages = factory().create_stages(1, &[group(vec![wrapper])], false).unwrap();
        assert_eq!(stages.len(), 1);

        let h1 = stages[0].host_action("h1").unwrap();
        assert_eq!(h1.role_commands.len(), 1);
        assert_eq!(
            h1.role_commands[0].params,
            BTreeMap::from([
                ("0.command".to_string(), "a".to_string()),
                ("1.command".to_string(), "b".to_string()),
            ])
        );

        let h2 = stages[0].host_action("h2").unwrap();
        assert_eq!(
            h2.role_commands[0].params,
            BTreeMap::from([("command".to_string(), "a".to_string())])
        );
    }
}
