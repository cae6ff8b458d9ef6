mod common;

use ash::vk;
use vkcompute::vulkan::{BufferIntent, GpuBuffer};
use vkcompute::{AllocationStrategy, ComputeConfig, ComputeError, ComputeJob, Scenario, ShaderBinary};

#[test]
fn test_context_matches_snapshot() {
    let config = ComputeConfig::manual();
    let Some(ctx) = common::context(&config) else { return };

    let family = ctx.capabilities.find_queue_family(vk::QueueFlags::COMPUTE).unwrap();
    assert_eq!(ctx.queue_family, family);
    assert!(!ctx.capabilities.memory_types.is_empty());

    let report = serde_json::to_value(ctx.capabilities.report()).unwrap();
    assert_eq!(report["device_name"], ctx.capabilities.device_name.as_str());
}

#[test]
fn test_buffer_write_and_read_back() {
    for config in common::both_strategies() {
        let Some(ctx) = common::context(&config) else { return };
        assert_eq!(ctx.allocation_strategy(), config.allocation);

        let mut buffer = GpuBuffer::from_slice(ctx.clone(), &[1u32, 2, 3, 4], BufferIntent::Upload).unwrap();
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.byte_size(), 16);
        assert!(buffer.allocation_size() >= buffer.byte_size());
        assert_eq!(buffer.read_back().unwrap(), vec![1, 2, 3, 4]);

        buffer.write(&[9, 9, 9, 9]).unwrap();
        // Reading twice is fine once nothing is in flight.
        assert_eq!(buffer.read_back().unwrap(), vec![9; 4]);
        assert_eq!(buffer.read_back().unwrap(), vec![9; 4]);
    }
}

#[test]
fn test_new_buffer_is_zeroed() {
    for config in common::both_strategies() {
        let Some(ctx) = common::context(&config) else { return };
        let mut buffer = GpuBuffer::<u32>::new(ctx, 256, BufferIntent::Readback).unwrap();
        assert!(buffer.read_back().unwrap().iter().all(|&v| v == 0));
    }
}

#[test]
fn test_buffer_misuse() {
    let config = ComputeConfig::manual();
    let Some(ctx) = common::context(&config) else { return };

    assert!(matches!(
        GpuBuffer::<u32>::new(ctx.clone(), 0, BufferIntent::Upload),
        Err(ComputeError::EmptyBuffer)
    ));

    let mut buffer = GpuBuffer::<u32>::new(ctx, 4, BufferIntent::Upload).unwrap();
    assert!(matches!(
        buffer.write(&[1, 2]),
        Err(ComputeError::LengthMismatch { expected: 4, actual: 2 })
    ));
}

#[test]
fn test_buffers_release_their_memory() {
    for config in common::both_strategies() {
        let Some(ctx) = common::context(&config) else { return };
        {
            let _a = GpuBuffer::<u32>::new(ctx.clone(), 1024, BufferIntent::Upload).unwrap();
            let _b = GpuBuffer::<u32>::new(ctx.clone(), 1024, BufferIntent::Readback).unwrap();
            let stats = ctx.allocator().stats();
            assert_eq!(stats.live_allocations, 2);
            assert!(stats.allocated_bytes >= 2 * 4096);
            assert!(stats.reserved_bytes >= stats.allocated_bytes);
        }
        let stats = ctx.allocator().stats();
        assert_eq!(stats.live_allocations, 0);
        assert_eq!(stats.total_allocations, 2);
    }
}

#[test]
fn test_stats_dump() {
    let path = std::env::temp_dir().join(format!("vkcompute-stats-{}.json", std::process::id()));
    let config = ComputeConfig::builder()
        .allocation(AllocationStrategy::Pooled)
        .stats_path(&path)
        .build();
    let Some(ctx) = common::context(&config) else { return };

    let scenario = Scenario::Copy { elements: 64 };
    let job = ComputeJob::new(ctx, ShaderBinary::from_bytes(scenario.shader()).unwrap(), config).unwrap();
    let inputs = scenario.inputs();
    let output = job.run(&[inputs[0].as_slice()], scenario.elements()).unwrap();
    scenario.verify(&output).unwrap();

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["strategy"], "pooled");
    assert_eq!(json["live_allocations"], 2);
    assert!(!json["blocks"].as_array().unwrap().is_empty());
    let _ = std::fs::remove_file(&path);
}
