mod common;

use std::{collections::HashMap, sync::Arc, time::Duration};

use common::{fixtures, mock_k8s::MockK8sClients};
use eksctl::cfn::NodeGroupType;
use eksctl::cluster::K8sFactory;
use futures::FutureExt;
use eksctl::k8s::DrainOptions;
use eksctl::nodegroup::{self, DrainInput};

const MANAGED_SELECTOR: &str = "eks.amazonaws.com/nodegroup=ng-a";

fn input(options: DrainOptions) -> DrainInput {
  DrainInput {
    nodegroups: vec![("ng-a".to_string(), NodeGroupType::Managed)],
    options,
    parallel: 1,
    plan: false,
  }
}

fn sorted(mut values: Vec<String>) -> Vec<String> {
  values.sort();
  values
}

#[tokio::test(start_paused = true)]
async fn drain_evicts_replicated_pods_and_keeps_daemonsets() {
  let k8s = fixtures::nodegroup_k8s(MANAGED_SELECTOR);

  nodegroup::drain(&k8s, &input(DrainOptions::default())).await.unwrap();

  let state = k8s.state();
  assert_eq!(sorted(state.evicted.clone()), vec!["default/web-1", "default/web-2"]);
  assert!(state.deleted_pods.is_empty());
  assert_eq!(
    sorted(state.cordoned.iter().map(|(n, _)| n.clone()).collect()),
    vec!["node-1", "node-2"]
  );
  assert!(state.cordoned.iter().all(|(_, cordoned)| *cordoned));
  assert_eq!(state.pods["node-1"].len(), 1);
  assert_eq!(state.pods["node-1"][0].name, "aws-node-1");
}

#[tokio::test(start_paused = true)]
async fn drain_retries_recoverable_evictions() {
  let k8s = fixtures::nodegroup_k8s(MANAGED_SELECTOR);
  k8s.state().recoverable_failures = HashMap::from([("web-1".to_string(), 2)]);

  nodegroup::drain(&k8s, &input(DrainOptions::default())).await.unwrap();

  assert_eq!(k8s.state().evicted.len(), 2);
  assert_eq!(k8s.state().recoverable_failures["web-1"], 0);
}

#[tokio::test(start_paused = true)]
async fn drain_fails_on_unrecoverable_eviction() {
  let k8s = fixtures::nodegroup_k8s(MANAGED_SELECTOR);
  k8s.state().unrecoverable.push("web-2".into());

  let err = nodegroup::drain(&k8s, &input(DrainOptions::default())).await.unwrap_err();
  assert_eq!(err.to_string(), "unrecoverable error evicting pod: default/web-2");
}

#[tokio::test(start_paused = true)]
async fn drain_without_eviction_deletes_pods() {
  let k8s = fixtures::nodegroup_k8s(MANAGED_SELECTOR);
  let options = DrainOptions {
    disable_eviction: true,
    ..Default::default()
  };

  nodegroup::drain(&k8s, &input(options)).await.unwrap();

  let state = k8s.state();
  assert!(state.evicted.is_empty());
  assert_eq!(sorted(state.deleted_pods.clone()), vec!["default/web-1", "default/web-2"]);
}

#[tokio::test(start_paused = true)]
async fn undo_uncordons_nodes() {
  let k8s = fixtures::nodegroup_k8s(MANAGED_SELECTOR);
  for node in k8s.state().nodes.values_mut().flatten() {
    node.unschedulable = true;
  }
  let options = DrainOptions {
    undo: true,
    ..Default::default()
  };

  nodegroup::drain(&k8s, &input(options)).await.unwrap();

  let state = k8s.state();
  assert_eq!(
    state.cordoned,
    vec![("node-1".to_string(), false), ("node-2".to_string(), false)]
  );
  assert!(state.evicted.is_empty());
}

#[tokio::test(start_paused = true)]
async fn drain_timeout_is_reported() {
  let k8s = fixtures::nodegroup_k8s(MANAGED_SELECTOR);
  k8s.state().recoverable_failures = HashMap::from([("web-1".to_string(), u32::MAX)]);
  let options = DrainOptions {
    timeout: Duration::from_secs(60),
    ..Default::default()
  };

  let err = nodegroup::drain(&k8s, &input(options)).await.unwrap_err();
  assert_eq!(err.to_string(), "timed out waiting for nodegroup \"ng-a\" to be drained");
}

#[tokio::test]
async fn drain_plan_mode_touches_nothing() {
  let k8s = fixtures::nodegroup_k8s(MANAGED_SELECTOR);
  let drain_input = DrainInput {
    plan: true,
    ..input(DrainOptions::default())
  };

  nodegroup::drain(&k8s, &drain_input).await.unwrap();

  assert!(k8s.state().cordoned.is_empty());
  assert!(k8s.state().evicted.is_empty());
}

#[tokio::test]
async fn drain_parallelism_is_bounded() {
  let k8s = fixtures::nodegroup_k8s(MANAGED_SELECTOR);

  for parallel in [0, 26] {
    let drain_input = DrainInput {
      parallel,
      ..input(DrainOptions::default())
    };
    let err = nodegroup::drain(&k8s, &drain_input).await.unwrap_err();
    assert_eq!(err.to_string(), "--parallel value must be of range 1-25");
  }
}

#[tokio::test]
async fn drain_of_empty_nodegroup_succeeds() {
  let k8s = MockK8sClients::default();
  nodegroup::drain(&k8s, &input(DrainOptions::default())).await.unwrap();
  assert!(k8s.state().cordoned.is_empty());
}

#[tokio::test(start_paused = true)]
async fn drain_covers_several_nodegroups() {
  let k8s = fixtures::nodegroup_k8s(MANAGED_SELECTOR);
  {
    let mut state = k8s.state();
    state.nodes.insert(
      "alpha.eksctl.io/nodegroup-name=ng-1".to_string(),
      vec![eksctl::k8s::NodeInfo {
        name: "node-3".into(),
        unschedulable: false,
      }],
    );
    state
      .pods
      .insert("node-3".to_string(), vec![fixtures::replicated_pod("web-3")]);
  }

  let drain_input = DrainInput {
    nodegroups: vec![
      ("ng-a".to_string(), NodeGroupType::Managed),
      ("ng-1".to_string(), NodeGroupType::Unmanaged),
    ],
    parallel: 2,
    ..input(DrainOptions::default())
  };
  nodegroup::drain(&k8s, &drain_input).await.unwrap();

  assert_eq!(
    sorted(k8s.state().evicted.clone()),
    vec!["default/web-1", "default/web-2", "default/web-3"]
  );
}

#[tokio::test(start_paused = true)]
async fn deleted_pods_get_a_capped_grace_period() {
  let k8s = fixtures::nodegroup_k8s(MANAGED_SELECTOR);
  {
    let mut state = k8s.state();
    let pods = state.pods.get_mut("node-1").unwrap();
    pods[0].termination_grace_period_seconds = Some(3600);
  }
  let options = DrainOptions {
    disable_eviction: true,
    max_grace_period: Duration::from_secs(600),
    ..Default::default()
  };

  nodegroup::drain(&k8s, &input(options)).await.unwrap();

  let state = k8s.state();
  assert!(state.grace_periods.contains(&("default/web-1".to_string(), Some(600))));
  assert!(state.grace_periods.contains(&("default/web-2".to_string(), None)));
  assert_eq!(sorted(state.deleted_pods.clone()), vec!["default/web-1", "default/web-2"]);
}

fn unreachable_cluster() -> K8sFactory<MockK8sClients> {
  Arc::new(|| async { Err::<MockK8sClients, _>(anyhow::anyhow!("cannot reach the Kubernetes API server")) }.boxed())
}

#[tokio::test]
async fn planned_drain_does_not_connect_to_the_cluster() {
  let drain_input = DrainInput {
    plan: true,
    ..input(DrainOptions::default())
  };
  nodegroup::connect_and_drain(&unreachable_cluster(), &drain_input).await.unwrap();

  let err = nodegroup::connect_and_drain(&unreachable_cluster(), &input(DrainOptions::default()))
    .await
    .unwrap_err();
  assert_eq!(err.to_string(), "cannot reach the Kubernetes API server");
}

#[tokio::test(start_paused = true)]
async fn approved_drain_connects_then_drains() {
  let k8s = fixtures::nodegroup_k8s(MANAGED_SELECTOR);

  nodegroup::connect_and_drain(&fixtures::k8s_factory(&k8s), &input(DrainOptions::default()))
    .await
    .unwrap();

  assert_eq!(sorted(k8s.state().evicted.clone()), vec!["default/web-1", "default/web-2"]);
}
