mod support;

use renderchain::{
    ChainConfig, ChainError, ChainState, ConstructError, DeviceError, FrameStatus, LinkInfo,
    LutSpec, ProgramSource, RenderChain, Rotation, ScaleRule, Size, Viewport, WrapMode,
    HISTORY_SLOTS,
};

use support::{frame, frame_data, Faults, Programs, RecordingDevice};

const VIEWPORT: Viewport = Viewport::new(0, 0, 800, 600);
const FRAME: Size = Size::new(256, 224);

fn config_with_lut(programs: &Programs) -> ChainConfig {
    let mut config = ChainConfig::new(vec![
        LinkInfo::new(ProgramSource::Stock, ScaleRule::Input(2.0)),
        LinkInfo::new(ProgramSource::Stock, ScaleRule::Input(1.0)),
        LinkInfo::new(ProgramSource::Stock, ScaleRule::Viewport(1.0)),
    ]);
    config.luts.push(LutSpec {
        name: "mask".to_string(),
        path: programs.write_png("mask.png", 4, 4),
        smooth: true,
        wrap: WrapMode::Repeat,
    });
    config
}

#[test]
fn construction_allocates_history_passes_and_luts() {
    let programs = Programs::new();
    let chain =
        RenderChain::construct(RecordingDevice::new(), config_with_lut(&programs), VIEWPORT).unwrap();

    let live = &chain.device().live;
    assert_eq!(live.textures.get(), HISTORY_SLOTS + 2 + 1);
    assert_eq!(live.buffers.get(), HISTORY_SLOTS + 2);
    assert_eq!(live.programs.get(), 3);
    assert_eq!(chain.state(), ChainState::Active);
    assert_eq!(chain.lut_count(), 1);
    assert_eq!(chain.frame_count(), 0);
}

#[test]
fn failed_allocation_releases_everything() {
    let programs = Programs::new();
    let total = HISTORY_SLOTS + 2 + 1;
    for failing in 1..=total {
        let device = RecordingDevice::with_faults(Faults {
            fail_texture_at: Some(failing),
            ..Faults::default()
        });
        let ConstructError { error, device } =
            RenderChain::construct(device, config_with_lut(&programs), VIEWPORT)
                .err()
                .expect("construction should fail");
        assert!(
            matches!(
                error,
                ChainError::Device(DeviceError::OutOfMemory)
                    | ChainError::Pass {
                        source: DeviceError::OutOfMemory,
                        ..
                    }
            ),
            "allocation {failing}: {error}"
        );
        assert_eq!(device.live.total(), 0, "allocation {failing} leaked");
    }
}

#[test]
fn compile_failure_names_the_pass() {
    let programs = Programs::new();
    let broken = programs.write("broken.decl", "sampler IN.texture 0\nfail\n");
    let config = ChainConfig::new(vec![
        LinkInfo::new(ProgramSource::Stock, ScaleRule::Input(1.0)),
        LinkInfo::new(ProgramSource::File(broken), ScaleRule::Viewport(1.0)),
    ]);

    let (error, device) = RenderChain::construct(RecordingDevice::new(), config, VIEWPORT)
        .err()
        .expect("construction should fail")
        .into_parts();
    assert!(matches!(
        error,
        ChainError::Pass {
            pass: 1,
            source: DeviceError::Compile { .. }
        }
    ));
    assert_eq!(device.live.total(), 0);
}

#[test]
fn missing_shader_file_is_reported() {
    let programs = Programs::new();
    let config = ChainConfig::new(vec![LinkInfo::new(
        ProgramSource::File(programs.path().join("absent.decl")),
        ScaleRule::Viewport(1.0),
    )]);
    let error = RenderChain::construct(RecordingDevice::new(), config, VIEWPORT)
        .err()
        .expect("construction should fail")
        .error;
    assert!(matches!(error, ChainError::ShaderSource { pass: 0, .. }));
}

#[test]
fn unreadable_lut_fails_and_releases_resources() {
    let programs = Programs::new();
    let mut config = config_with_lut(&programs);
    config.luts[0].path = programs.write("mask.png.txt", "not an image");

    let (error, device) = RenderChain::construct(RecordingDevice::new(), config, VIEWPORT)
        .err()
        .expect("construction should fail")
        .into_parts();
    assert!(matches!(error, ChainError::Lut { ref name, .. } if name == "mask"));
    assert_eq!(device.live.total(), 0);
}

#[test]
fn duplicate_lut_names_are_rejected() {
    let programs = Programs::new();
    let mut config = config_with_lut(&programs);
    let again = config.luts[0].clone();
    config.luts.push(again);

    let error = RenderChain::construct(RecordingDevice::new(), config, VIEWPORT)
        .err()
        .expect("construction should fail")
        .error;
    assert!(matches!(error, ChainError::DuplicateLut(ref name) if name == "mask"));
}

#[test]
fn structural_limits_are_checked_before_allocation() {
    let empty = RenderChain::construct(RecordingDevice::new(), ChainConfig::new(Vec::new()), VIEWPORT)
        .err()
        .expect("empty chain should fail");
    assert!(matches!(empty.error, ChainError::NoPasses));
    assert!(empty.device.events.is_empty());

    let mut zero_scale = ChainConfig::default();
    zero_scale.input_scale = 0;
    let error = RenderChain::construct(RecordingDevice::new(), zero_scale, VIEWPORT)
        .err()
        .expect("zero input scale should fail")
        .error;
    assert!(matches!(error, ChainError::InvalidInputScale));
}

#[test]
fn invalid_alias_fails_before_allocation() {
    let config = ChainConfig::new(vec![
        LinkInfo::new(ProgramSource::Stock, ScaleRule::Input(1.0)).with_alias("PASS1"),
        LinkInfo::new(ProgramSource::Stock, ScaleRule::Viewport(1.0)),
    ]);
    let (error, device) = RenderChain::construct(RecordingDevice::new(), config, VIEWPORT)
        .err()
        .expect("construction should fail")
        .into_parts();
    assert!(matches!(error, ChainError::InvalidAlias { pass: 0, ref alias, .. } if alias == "PASS1"));
    assert!(device.events.is_empty());
}

#[test]
fn broken_preset_falls_back_to_passthrough() {
    let programs = Programs::new();
    let broken = programs.write("broken.decl", "fail\n");
    let mut config = ChainConfig::new(vec![
        LinkInfo::new(ProgramSource::File(broken), ScaleRule::Input(1.0)),
        LinkInfo::new(ProgramSource::Stock, ScaleRule::Viewport(1.0)),
    ]);
    config.input_scale = 2;
    config.smooth = true;

    let (mut chain, fallback) =
        RenderChain::construct_or_passthrough(RecordingDevice::new(), config, VIEWPORT).unwrap();
    assert!(matches!(fallback, Some(ChainError::Pass { pass: 0, .. })));
    assert_eq!(chain.pass_count(), 1);
    assert_eq!(chain.config().input_scale, 2);
    assert!(chain.config().smooth);
    assert_eq!(chain.pass_input_size(0), Some(Size::new(512, 512)));

    let data = frame_data(FRAME, 3);
    assert_eq!(
        chain.render(&frame(&data, FRAME), Rotation::Deg0).unwrap(),
        FrameStatus::Rendered
    );
}

#[test]
fn working_preset_has_no_fallback() {
    let (chain, fallback) = RenderChain::construct_or_passthrough(
        RecordingDevice::new(),
        ChainConfig::new(vec![LinkInfo::new(ProgramSource::Stock, ScaleRule::Input(3.0))]),
        VIEWPORT,
    )
    .unwrap();
    assert!(fallback.is_none());
    assert_eq!(chain.pass_count(), 1);
}

#[test]
fn reload_failure_keeps_the_running_chain() {
    let programs = Programs::new();
    let mut chain =
        RenderChain::construct(RecordingDevice::new(), config_with_lut(&programs), VIEWPORT).unwrap();
    let data = frame_data(FRAME, 3);
    chain.render(&frame(&data, FRAME), Rotation::Deg0).unwrap();
    let live = chain.device().live.total();

    let broken = ChainConfig::new(vec![LinkInfo::new(
        ProgramSource::File(programs.write("broken.decl", "fail\n")),
        ScaleRule::Viewport(1.0),
    )]);
    assert!(chain.reload(broken).is_err());
    assert_eq!(chain.pass_count(), 3);
    assert_eq!(chain.device().live.total(), live);
    assert_eq!(
        chain.render(&frame(&data, FRAME), Rotation::Deg0).unwrap(),
        FrameStatus::Rendered
    );
    assert_eq!(chain.frame_count(), 2);
}

#[test]
fn reload_replaces_passes_and_keeps_frame_count() {
    let programs = Programs::new();
    let mut chain =
        RenderChain::construct(RecordingDevice::new(), config_with_lut(&programs), VIEWPORT).unwrap();
    let data = frame_data(FRAME, 3);
    chain.render(&frame(&data, FRAME), Rotation::Deg0).unwrap();

    chain.reload(ChainConfig::default()).unwrap();
    assert_eq!(chain.pass_count(), 1);
    assert_eq!(chain.lut_count(), 0);
    assert_eq!(chain.device().live.textures.get(), HISTORY_SLOTS);
    chain.render(&frame(&data, FRAME), Rotation::Deg0).unwrap();
    assert_eq!(chain.frame_count(), 2);
}

#[test]
fn invalid_frames_are_rejected_without_side_effects() {
    let mut chain = RenderChain::construct(RecordingDevice::new(), ChainConfig::default(), VIEWPORT).unwrap();

    let empty = frame_data(Size::new(0, 0), 0);
    let too_big = frame_data(Size::new(300, 200), 1);
    let short = vec![0u8; 16];
    let cases = [
        frame(&empty, Size::new(0, 0)),
        frame(&too_big, Size::new(300, 200)),
        renderchain::Frame::new(&short, 8, 8, 32),
        renderchain::Frame::new(&too_big, 100, 10, 16),
    ];
    for bad in &cases {
        let error = chain.render(bad, Rotation::Deg0).unwrap_err();
        assert!(matches!(error, ChainError::InvalidFrame(_)), "{error}");
    }
    assert_eq!(chain.frame_count(), 0);
    assert_eq!(chain.state(), ChainState::Active);
    assert!(chain.device().draws().is_empty());
}

#[test]
fn destroy_releases_all_resources() {
    let programs = Programs::new();
    let chain =
        RenderChain::construct(RecordingDevice::new(), config_with_lut(&programs), VIEWPORT).unwrap();
    let device = chain.destroy();
    assert_eq!(device.live.total(), 0);
}
