//! KestrelEngine - 图形设备抽象层演示程序
//!
//! 无头运行设备层的完整生命周期：创建设备、交换链和帧资源，
//! 录制并提交若干帧，中途调整交换链尺寸，最后走安全销毁流程。
//! 默认使用软件后端，可通过配置或命令行切换到 DirectX 12。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件（config.toml）
//! cargo run
//!
//! # 使用 DirectX 12（命令行覆盖，仅 Windows）
//! cargo run -- --dx12
//! ```
//!
//! # 命令行参数
//!
//! - `--dx12` / `--software`: 选择图形后端
//! - `--debug-layer`: 启用调试层
//! - `--width <value>` / `--height <value>`: 设置呈现尺寸

use tracing::{error, info};

use kestrel_engine::core::{log, Config};
use kestrel_engine::gfx::{Device, DeviceDesc, QueueKind, SwapChainDesc};

fn main() {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数
    config.apply_args(std::env::args());

    // 3. 验证配置
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // 4. 初始化日志系统（使用配置中的设置）
    let log_file = if config.logging.file_output {
        Some(config.logging.log_file.as_str())
    } else {
        None
    };
    log::init_logger(config.logging.level, config.logging.file_output, log_file);
    info!("KestrelEngine starting...");
    info!(version = env!("CARGO_PKG_VERSION"), "Application initialized");

    info!(
        backend = config.device.backend.name(),
        width = config.window.width,
        height = config.window.height,
        "Device configuration"
    );

    if let Err(e) = run(&config) {
        error!("Engine run failed: {}", e);
        eprintln!("Engine run failed: {}", e);
        std::process::exit(1);
    }

    info!("KestrelEngine exited cleanly");
}

/// 设备层生命周期演示
///
/// # 执行流程
///
/// 1. 按配置创建设备
/// 2. 创建交换链与命令上下文
/// 3. 逐帧录制 → 提交 → 呈现 → 收尾
/// 4. 中途调整交换链尺寸（验证 GPU 空闲等待路径）
/// 5. 显式销毁交换链与设备
fn run(config: &Config) -> kestrel_engine::core::Result<()> {
    // 1. 创建设备
    let desc = DeviceDesc::from_config(&config.device).with_name("Main Device");
    let mut device = Device::create(desc)?;
    info!(backend = device.backend().name(), "Device created");

    // 2. 创建交换链（软件后端无需窗口）
    let mut swap_chain = device.create_swap_chain(
        &SwapChainDesc::new(config.window.width, config.window.height)
            .with_buffer_count(config.device.frame_buffer_count)
            .with_vsync(config.device.vsync)
            .with_name("Main Swap Chain"),
    )?;

    // 3. 命令上下文，跨帧复用
    let mut ctx = device.create_command_context(QueueKind::Direct)?;

    // 4. 渲染若干帧
    for frame in 0..6u32 {
        // 中途调整一次尺寸，走 GPU 空闲等待 + 缓冲区重建路径
        if frame == 3 {
            swap_chain.resize(config.window.width / 2, config.window.height / 2)?;
            info!(frame, "Swap chain resized");
        }

        let back_buffer = swap_chain
            .current_back_buffer()
            .expect("swap chain has back buffers");
        let rtv = back_buffer.rtv().expect("back buffer carries an RTV");

        ctx.insert_marker(&format!("frame {}", frame))?;
        ctx.clear_render_target(rtv)?;

        let fence_value = device.graphics_queue().execute(&mut ctx)?;
        swap_chain.present()?;
        let frame_value = device.end_frame()?;

        info!(frame, fence_value, frame_value, "Frame submitted");

        // 单上下文复用：等待本帧提交完成后再重置
        device.frame_fence().wait(fence_value);
        ctx.reset(device.graphics_queue())?;
    }

    // 5. 销毁：交换链显式销毁，设备走完整的安全销毁流程
    swap_chain.destroy();
    device.flush();
    device.shutdown();
    info!("Device shut down");
    Ok(())
}
