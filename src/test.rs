use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use rstest::rstest;

use crate::config::RunConfig;
use crate::runner::{self, RunError, Stage};
use crate::vulkan_core::{self, Device, FeatureLevel, Fence, WaitMode};

static DEBUG: Lazy<()> = Lazy::new(|| {
    pretty_env_logger::try_init().ok();
});

/// Whether `err` only says this machine has no usable Vulkan setup.
fn unavailable(err: &RunError) -> bool {
    use vulkan_core::Error;
    match err.source {
        Error::Loading(_)
        | Error::NoAdapters
        | Error::QueueFamilyNotFound
        | Error::MissingFeature { .. }
        | Error::UnsupportedFeatureLevel { .. } => true,
        Error::Driver { .. } => err.stage <= Stage::DeviceReady,
        _ => false,
    }
}

fn config() -> RunConfig {
    let _ = *DEBUG;
    RunConfig::default()
}

fn device() -> Option<Arc<Device>> {
    let config = config();
    let adapters = match runner::enumerate_adapters(&config) {
        Ok(adapters) => adapters,
        Err(err) => {
            log::warn!("Skipping, no Vulkan available: {err}");
            return None;
        }
    };
    match runner::create_device(&adapters, &config) {
        Ok(device) => Some(device),
        Err(err) => {
            log::warn!("Skipping, no usable device: {err}");
            None
        }
    }
}

#[test]
fn adapters_in_index_order() {
    let config = config();
    let adapters = match runner::enumerate_adapters(&config) {
        Ok(adapters) => adapters,
        Err(err) => {
            log::warn!("Skipping, no Vulkan available: {err}");
            return;
        }
    };
    let reported = unsafe { adapters.instance.enumerate_physical_devices() }.unwrap();

    assert_eq!(adapters.adapters.len(), reported.len());
    for (i, (adapter, physical_device)) in adapters.adapters.iter().zip(reported).enumerate() {
        assert_eq!(adapter.index, i);
        assert_eq!(adapter.physical_device, physical_device);
    }
}

#[rstest]
#[case(WaitMode::Blocking)]
#[case(WaitMode::Spin)]
fn dispatch_writes_one(#[case] wait: WaitMode) {
    let config = RunConfig { wait, ..config() };
    let report = match runner::run_with(&config) {
        Ok(report) => report,
        Err(err) if unavailable(&err) => {
            log::warn!("Skipping: {err}");
            return;
        }
        Err(err) => panic!("{err}"),
    };

    assert_eq!(report.value, 1);
    assert!(report.fence_value >= runner::FENCE_VALUE);
    assert_eq!(report.selected, 0);
    assert!(!report.adapters.is_empty());
}

#[test]
fn unsupported_feature_level_stops_at_device() {
    let config = RunConfig {
        feature_level: FeatureLevel::new(99, 0),
        ..config()
    };
    let err = runner::run_with(&config).unwrap_err();
    if err.stage == Stage::AdaptersEnumerated {
        log::warn!("Skipping, no Vulkan available: {err}");
        return;
    }

    assert_eq!(err.stage, Stage::DeviceReady);
    assert_eq!(err.reached, Stage::AdaptersEnumerated);
    match err.source {
        vulkan_core::Error::UnsupportedFeatureLevel { requested, .. } => {
            assert_eq!(requested, FeatureLevel::new(99, 0));
        }
        other => panic!("expected UnsupportedFeatureLevel, got {other:?}"),
    }
}

#[test]
fn adapter_out_of_range() {
    let config = RunConfig {
        adapter: usize::MAX,
        ..config()
    };
    let err = runner::run_with(&config).unwrap_err();
    if err.stage == Stage::AdaptersEnumerated {
        log::warn!("Skipping, no Vulkan available: {err}");
        return;
    }

    assert_eq!(err.stage, Stage::DeviceReady);
    assert!(matches!(
        err.source,
        vulkan_core::Error::AdapterOutOfRange {
            index: usize::MAX,
            ..
        }
    ));
}

#[test]
fn second_dispatch_is_rejected() {
    let Some(device) = device() else {
        return;
    };
    let runner::CommandInfra { mut list, .. } = runner::create_command_infra(&device).unwrap();
    let pipeline = runner::create_pipeline(&device).unwrap();
    let buffer = runner::create_buffer(&device).unwrap();

    list.set_compute_root_signature(&pipeline.root_signature);
    list.set_pipeline_state(&pipeline.pipeline_state);
    list.set_compute_root_unordered_access_view(0, &buffer).unwrap();
    list.dispatch(1, 1, 1).unwrap();
    assert!(matches!(
        list.dispatch(1, 1, 1),
        Err(vulkan_core::Error::DispatchAlreadyRecorded)
    ));

    let closed = list.close().unwrap();
    assert!(closed.dispatched());
}

#[test]
fn root_argument_needs_root_signature() {
    let Some(device) = device() else {
        return;
    };
    let runner::CommandInfra { mut list, .. } = runner::create_command_infra(&device).unwrap();
    let buffer = runner::create_buffer(&device).unwrap();

    assert!(matches!(
        list.set_compute_root_unordered_access_view(0, &buffer),
        Err(vulkan_core::Error::RootSignatureNotSet)
    ));
}

#[test]
fn buffer_maps_requested_range() {
    let Some(device) = device() else {
        return;
    };
    let buffer = runner::create_buffer(&device).unwrap();

    assert_eq!(buffer.size(), runner::BUFFER_SIZE);
    assert_eq!(buffer.mapped_range(runner::READBACK_RANGE).unwrap().len(), 64);
    assert_eq!(buffer.read_u32(runner::READBACK_RANGE).unwrap().len(), 16);
    assert!(matches!(
        buffer.mapped_range(0..runner::BUFFER_SIZE + 1),
        Err(vulkan_core::Error::MapOutOfRange { .. })
    ));
}

#[rstest]
#[case(WaitMode::Blocking)]
#[case(WaitMode::Spin)]
fn unsignaled_fence_times_out(#[case] mode: WaitMode) {
    let Some(device) = device() else {
        return;
    };
    let fence = Fence::create(&device, 0).unwrap();

    let err = fence.wait(1, mode, Duration::from_millis(10)).unwrap_err();
    assert!(matches!(
        err,
        vulkan_core::Error::WaitTimedOut {
            target: 1,
            completed: 0,
            ..
        }
    ));
}

#[test]
fn abandoned_submission_leaks_its_work() {
    let Some(device) = device() else {
        return;
    };
    let runner::CommandInfra { queue, list, .. } = runner::create_command_infra(&device).unwrap();
    let pipeline = runner::create_pipeline(&device).unwrap();
    let buffer = runner::create_buffer(&device).unwrap();
    let list = runner::record(list, &pipeline, &buffer).unwrap();
    let mut submission = runner::submit(&device, &queue, list).unwrap();

    assert!(!device.has_abandoned_work());
    submission.abandon();
    assert!(submission.is_abandoned());
    drop(submission);

    // Everything the dispatch touches is leaked instead of destroyed.
    assert!(device.has_abandoned_work());
    drop(buffer);
    drop(pipeline);
}
