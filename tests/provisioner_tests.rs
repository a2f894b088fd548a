//! End-to-end tests of the provisioning pipeline against a sandboxed
//! filesystem and a recording service manager.

mod common;

use common::{Recorder, Sandbox};
use gantry::{Allocator, Error, ProvisionRequest, Provisioner, StepOutcome};
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

fn mode(path: &std::path::Path) -> u32 {
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[tokio::test]
async fn test_first_provision_on_empty_host() {
    let sandbox = Sandbox::new();
    let recorder = Arc::new(Recorder::new());
    let provisioner = Provisioner::new(sandbox.config.clone(), recorder.clone());

    let report = provisioner
        .provision(&ProvisionRequest::new(&sandbox.app_dir))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.record.last_number, 0);
    assert_eq!(report.record.new_number, 1);
    assert_eq!(report.record.port, 5001);
    assert_eq!(report.unit_name, "flask_app1");
    assert_eq!(
        report.descriptor_path,
        sandbox.config.unit_dir.join("flask_app1.service")
    );
    assert_eq!(
        report.script_path,
        sandbox.config.home_root.join("shop").join("pull.sh")
    );

    let descriptor = std::fs::read_to_string(&report.descriptor_path).unwrap();
    assert!(descriptor.contains(&format!(
        "WorkingDirectory={}\n",
        sandbox.app_dir.display()
    )));
    assert!(descriptor.contains("--bind 0.0.0.0:5001 app:app"));
    assert_eq!(mode(&report.descriptor_path), 0o644);

    let script = std::fs::read_to_string(&report.script_path).unwrap();
    assert!(script.contains("SERVICE='flask_app1'"));
    assert_eq!(mode(&report.script_path), 0o755);

    assert_eq!(recorder.calls(), vec!["daemon-reload"]);
}

#[tokio::test]
async fn test_provision_continues_after_highest_unit() {
    let sandbox = Sandbox::new();
    sandbox.add_unit("flask_app1.service");
    sandbox.add_unit("flask_app3.service");
    sandbox.add_unit("flask_app7.service");

    let provisioner = Provisioner::new(sandbox.config.clone(), Arc::new(Recorder::new()));
    let report = provisioner
        .provision(&ProvisionRequest::new(&sandbox.app_dir))
        .await
        .unwrap();

    assert_eq!(report.record.new_number, 8);
    assert_eq!(report.record.port, 5008);
    assert!(sandbox.config.unit_dir.join("flask_app8.service").exists());
}

#[tokio::test]
async fn test_repeated_provisions_get_fresh_units_and_rebind_script() {
    let sandbox = Sandbox::new();
    let provisioner = Provisioner::new(sandbox.config.clone(), Arc::new(Recorder::new()));
    let request = ProvisionRequest::new(&sandbox.app_dir);

    let first = provisioner.provision(&request).await.unwrap();
    let second = provisioner.provision(&request).await.unwrap();

    assert_eq!(first.record.new_number, 1);
    assert_eq!(second.record.new_number, 2);
    assert!(first.descriptor_path.exists());
    assert!(second.descriptor_path.exists());

    // One script path, bound to the latest unit.
    assert_eq!(first.script_path, second.script_path);
    let script = std::fs::read_to_string(&second.script_path).unwrap();
    assert!(script.contains("SERVICE='flask_app2'"));
}

#[tokio::test]
async fn test_counter_survives_deleted_units() {
    let sandbox = Sandbox::new();
    let provisioner = Provisioner::new(sandbox.config.clone(), Arc::new(Recorder::new()));
    let request = ProvisionRequest::new(&sandbox.app_dir);

    let first = provisioner.provision(&request).await.unwrap();
    std::fs::remove_file(&first.descriptor_path).unwrap();

    let second = provisioner.provision(&request).await.unwrap();
    assert_eq!(second.record.new_number, 2);
}

#[tokio::test]
async fn test_reload_failure_is_reported_and_script_still_written() {
    let sandbox = Sandbox::new();
    let recorder = Arc::new(Recorder {
        fail_reload: true,
        ..Default::default()
    });
    let provisioner = Provisioner::new(sandbox.config.clone(), recorder.clone());

    let report = provisioner
        .provision(&ProvisionRequest::new(&sandbox.app_dir))
        .await
        .unwrap();

    assert!(!report.is_success());
    assert!(matches!(report.reload, StepOutcome::Failed(_)));
    assert_eq!(report.script, StepOutcome::Done);
    assert!(report.descriptor_path.exists());
    assert!(report.script_path.exists());

    // The identifier is consumed even though activation failed.
    assert_eq!(
        Allocator::new(&sandbox.config).peek().unwrap().new_number,
        2
    );
}

#[tokio::test]
async fn test_existing_descriptor_is_never_overwritten() {
    let sandbox = Sandbox::new();
    let provisioner = Provisioner::new(sandbox.config.clone(), Arc::new(Recorder::new()));

    let request = ProvisionRequest::new(&sandbox.app_dir);
    let record = provisioner.allocator().peek().unwrap();
    let plan = provisioner.plan(&request, record).unwrap();

    std::fs::write(&plan.descriptor_path, "precious").unwrap();

    let result = provisioner.persist_and_activate(&plan).await;
    assert!(matches!(result, Err(Error::DescriptorExists(_))));
    assert_eq!(
        std::fs::read_to_string(&plan.descriptor_path).unwrap(),
        "precious"
    );
}

#[tokio::test]
async fn test_unsafe_working_dir_leaves_no_trace() {
    let sandbox = Sandbox::new();
    let recorder = Arc::new(Recorder::new());
    let provisioner = Provisioner::new(sandbox.config.clone(), recorder.clone());

    let evil = sandbox.temp.path().join("apps/evil\nExecStartPre=/bin/sh");
    let result = provisioner.provision(&ProvisionRequest::new(evil)).await;

    assert!(matches!(result, Err(Error::UnsafeValue { .. })));
    assert!(recorder.calls().is_empty());
    assert_eq!(
        std::fs::read_dir(&sandbox.config.unit_dir).unwrap().count(),
        0
    );
    assert_eq!(
        Allocator::new(&sandbox.config).peek().unwrap().new_number,
        1
    );
}

#[tokio::test]
async fn test_explicit_script_path() {
    let sandbox = Sandbox::new();
    let provisioner = Provisioner::new(sandbox.config.clone(), Arc::new(Recorder::new()));
    let script_path = sandbox.temp.path().join("hooks/deploy.sh");

    let report = provisioner
        .provision(&ProvisionRequest::new(&sandbox.app_dir).with_script_path(&script_path))
        .await
        .unwrap();

    assert_eq!(report.script_path, script_path);
    assert!(script_path.exists());
}

#[test]
fn test_preview_does_not_reserve() {
    let sandbox = Sandbox::new();
    sandbox.add_unit("flask_app4.service");
    let provisioner = Provisioner::new(sandbox.config.clone(), Arc::new(Recorder::new()));

    let request = ProvisionRequest::new(&sandbox.app_dir);
    let first = provisioner.preview(&request).unwrap();
    let second = provisioner.preview(&request).unwrap();

    assert_eq!(first.record.new_number, 5);
    assert_eq!(second.record.new_number, 5);
    assert!(!first.descriptor_path.exists());
    assert!(!first.script_path.exists());
}

#[test]
fn test_concurrent_reservations_are_distinct() {
    let sandbox = Sandbox::new();
    let config = sandbox.config.clone();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let config = config.clone();
            std::thread::spawn(move || {
                let allocator = Allocator::new(&config);
                let reservation = allocator.reserve().unwrap();
                let id = reservation.record().new_number;
                std::fs::write(config.unit_path(id), "").unwrap();
                reservation.commit().unwrap();
                id
            })
        })
        .collect();

    let mut ids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();
    assert_eq!(ids, (1..=8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_waiting_for_lock_keeps_runtime_responsive() {
    let sandbox = Sandbox::new();
    let held = Allocator::new(&sandbox.config).reserve().unwrap();

    let provisioner = Arc::new(Provisioner::new(
        sandbox.config.clone(),
        Arc::new(Recorder::new()),
    ));
    let request = ProvisionRequest::new(sandbox.app_dir.clone());
    let task = {
        let provisioner = provisioner.clone();
        tokio::spawn(async move { provisioner.provision(&request).await })
    };

    // Single-threaded runtime: this only wakes if the waiting task yielded.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!task.is_finished());

    assert_eq!(held.commit().unwrap().new_number, 1);

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.record.new_number, 2);
    assert_eq!(report.unit_name, "flask_app2");
}
