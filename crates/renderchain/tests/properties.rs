mod support;

use renderchain::{
    model_view_proj, ChainConfig, ChainState, FrameStatus, LinkInfo, ProgramSource, RenderChain,
    Rotation, ScaleRule, Size, UniformValue, Viewport,
};

use support::{frame, frame_data, Event, Programs, RecordingDevice};

const SNES: Size = Size::new(256, 224);
const FULL_HD: Viewport = Viewport::new(0, 0, 1920, 1080);

fn history_program(programs: &Programs) -> ProgramSource {
    let mut decl = String::from("sampler IN.texture 0\nsampler ORIG.texture 1\nsampler PREV.texture 2\n");
    for n in 1..=6 {
        decl.push_str(&format!("sampler PREV{n}.texture {}\n", n + 2));
    }
    ProgramSource::File(programs.write("history.decl", &decl))
}

fn three_pass_config(programs: &Programs) -> ChainConfig {
    let last = programs.write(
        "final.decl",
        "sampler IN.texture 0\nuniform IN.video_size\nuniform IN.texture_size\nuniform IN.output_size\nuniform modelViewProj\n",
    );
    ChainConfig::new(vec![
        LinkInfo::new(ProgramSource::Stock, ScaleRule::Input(1.0)),
        LinkInfo::new(ProgramSource::Stock, ScaleRule::Viewport(1.0)),
        LinkInfo {
            scale_x: ScaleRule::Absolute(256),
            scale_y: ScaleRule::Absolute(224),
            ..LinkInfo::new(ProgramSource::File(last), ScaleRule::Input(1.0))
        },
    ])
}

fn tag(frame: u64) -> u8 {
    frame as u8 + 1
}

#[test]
fn history_inputs_see_previous_frames_in_order() {
    let programs = Programs::new();
    let config = ChainConfig::new(vec![LinkInfo::new(
        history_program(&programs),
        ScaleRule::Viewport(1.0),
    )]);
    let mut chain = RenderChain::construct(RecordingDevice::new(), config, FULL_HD).unwrap();

    for k in 0..12u64 {
        let data = frame_data(SNES, tag(k));
        assert_eq!(
            chain.render(&frame(&data, SNES), Rotation::Deg0).unwrap(),
            FrameStatus::Rendered
        );
    }

    let draws = chain.device().draws();
    assert_eq!(draws.len(), 12);
    for (k, draw) in draws.iter().enumerate() {
        let k = k as u64;
        assert_eq!(draw.contents[&0], Some(tag(k)), "IN at frame {k}");
        assert_eq!(draw.contents[&1], Some(tag(k)), "ORIG at frame {k}");
        assert_eq!(draw.textures[&0], draw.textures[&1]);
        // Slot 2 is PREV (one frame back); slot n + 2 is PREVn (n + 1 back).
        for back in 1..=7u64 {
            let slot = back as u32 + 1;
            let expected = k.checked_sub(back).map(tag);
            assert_eq!(draw.contents[&slot], expected, "{back} frames back at frame {k}");
        }
    }
    assert_eq!(chain.frame_count(), 12);
}

#[test]
fn history_slots_are_distinct_textures() {
    let programs = Programs::new();
    let config = ChainConfig::new(vec![LinkInfo::new(
        history_program(&programs),
        ScaleRule::Viewport(1.0),
    )]);
    let mut chain = RenderChain::construct(RecordingDevice::new(), config, FULL_HD).unwrap();
    let data = frame_data(SNES, 1);
    chain.render(&frame(&data, SNES), Rotation::Deg0).unwrap();

    let draw = chain.device().draws()[0].clone();
    let mut ids: Vec<usize> = (1..=8).map(|slot| draw.textures[&slot]).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}

#[test]
fn resize_is_idempotent() {
    let programs = Programs::new();
    let mut chain =
        RenderChain::construct(RecordingDevice::new(), three_pass_config(&programs), FULL_HD).unwrap();

    let smaller = Viewport::new(0, 0, 640, 480);
    assert_eq!(chain.resize(smaller).unwrap(), 1);
    let created = chain.device().textures_created().len();
    assert_eq!(chain.resize(smaller).unwrap(), 0);
    assert_eq!(chain.device().textures_created().len(), created);

    let fresh =
        RenderChain::construct(RecordingDevice::new(), three_pass_config(&programs), smaller).unwrap();
    for index in 0..3 {
        assert_eq!(chain.pass_input_size(index), fresh.pass_input_size(index));
        assert_eq!(chain.pass_target_size(index), fresh.pass_target_size(index));
    }
    assert_eq!(chain.pass_input_size(2), Some(Size::new(1024, 512)));
}

#[test]
fn resize_within_same_power_of_two_reallocates_nothing() {
    let programs = Programs::new();
    let mut chain =
        RenderChain::construct(RecordingDevice::new(), three_pass_config(&programs), FULL_HD).unwrap();
    let before = chain.device().textures_created().len();

    assert_eq!(chain.resize(Viewport::new(0, 0, 1600, 1050)).unwrap(), 0);
    assert_eq!(chain.device().textures_created().len(), before);
    assert_eq!(chain.pass_input_size(2), Some(Size::new(2048, 2048)));
}

#[test]
fn resize_clears_targets_without_reallocating() {
    let programs = Programs::new();
    let mut chain =
        RenderChain::construct(RecordingDevice::new(), three_pass_config(&programs), FULL_HD).unwrap();
    let data = frame_data(SNES, 1);
    chain.render(&frame(&data, SNES), Rotation::Deg0).unwrap();

    assert_eq!(chain.resize(Viewport::new(0, 0, 1100, 1080)).unwrap(), 0);
    chain.device_mut().events.clear();
    chain.render(&frame(&data, SNES), Rotation::Deg0).unwrap();

    let device = chain.device();
    let cleared = |label: &str| {
        let id = device.texture_id(label).unwrap();
        device
            .events
            .iter()
            .filter(|event| **event == Event::ClearTexture(id))
            .count()
    };
    assert_eq!(cleared("pass 1 input"), 1);
    assert_eq!(cleared("pass 2 input"), 1);

    chain.device_mut().events.clear();
    chain.render(&frame(&data, SNES), Rotation::Deg0).unwrap();
    let device = chain.device();
    let target = device.texture_id("pass 2 input").unwrap();
    assert!(!device.events.contains(&Event::ClearTexture(target)));
}

#[test]
fn failed_resize_keeps_previous_viewport() {
    let programs = Programs::new();
    let small = Viewport::new(0, 0, 640, 480);
    let mut chain =
        RenderChain::construct(RecordingDevice::new(), three_pass_config(&programs), small).unwrap();
    let next = chain.device().textures_created().len() + 1;
    chain.device_mut().faults.fail_texture_at = Some(next);

    assert!(chain.resize(FULL_HD).is_err());
    assert_eq!(chain.state(), ChainState::Lost);
    assert_eq!(chain.viewport(), small);

    let data = frame_data(SNES, 1);
    assert_eq!(
        chain.render(&frame(&data, SNES), Rotation::Deg0).unwrap(),
        FrameStatus::Rendered
    );
    assert_eq!(chain.pass_input_size(2), Some(Size::new(1024, 512)));
    assert_eq!(chain.device().draws().last().unwrap().viewport, Some(small));

    assert_eq!(chain.resize(FULL_HD).unwrap(), 1);
    assert_eq!(chain.viewport(), FULL_HD);
}

#[test]
fn resize_then_render_uses_new_viewport() {
    let programs = Programs::new();
    let mut chain =
        RenderChain::construct(RecordingDevice::new(), three_pass_config(&programs), FULL_HD).unwrap();
    let data = frame_data(SNES, 1);
    chain.render(&frame(&data, SNES), Rotation::Deg0).unwrap();

    let viewport = Viewport::new(100, 50, 800, 600);
    chain.resize(viewport).unwrap();
    chain.device_mut().events.clear();
    chain.render(&frame(&data, SNES), Rotation::Deg0).unwrap();

    let draws = chain.device().draws();
    assert_eq!(draws[1].viewport, Some(Viewport::new(0, 0, 800, 600)));
    assert_eq!(draws[2].viewport, Some(viewport));
    assert_eq!(
        draws[2].value("IN.output_size"),
        Some(UniformValue::Vec2([800.0, 600.0]))
    );
}

#[test]
fn recovery_restores_an_equivalent_chain() {
    let programs = Programs::new();
    let mut chain =
        RenderChain::construct(RecordingDevice::new(), three_pass_config(&programs), FULL_HD).unwrap();
    let data = frame_data(SNES, 1);
    for _ in 0..3 {
        chain.render(&frame(&data, SNES), Rotation::Deg0).unwrap();
    }

    let sizes = |chain: &RenderChain<RecordingDevice>| -> Vec<(Option<Size>, Option<Size>)> {
        (0..chain.pass_count())
            .map(|index| (chain.pass_input_size(index), chain.pass_target_size(index)))
            .collect()
    };
    let before = sizes(&chain);
    let textures = chain.device().live.textures.get();
    let buffers = chain.device().live.buffers.get();
    let programs_live = chain.device().live.programs.get();

    chain.device_mut().lose();
    assert_eq!(
        chain.render(&frame(&data, SNES), Rotation::Deg0).unwrap(),
        FrameStatus::Rendered
    );

    assert_eq!(chain.state(), ChainState::Active);
    assert_eq!(chain.pass_count(), 3);
    assert_eq!(sizes(&chain), before);
    assert_eq!(chain.device().live.textures.get(), textures);
    assert_eq!(chain.device().live.buffers.get(), buffers);
    assert_eq!(chain.device().live.programs.get(), programs_live);
    assert_eq!(chain.device().resets, 1);
    assert_eq!(chain.device().recreates, 0);
    assert_eq!(chain.frame_count(), 4);
}

#[test]
fn final_pass_fills_viewport_with_exact_output() {
    let programs = Programs::new();
    let mut chain =
        RenderChain::construct(RecordingDevice::new(), three_pass_config(&programs), FULL_HD).unwrap();

    assert_eq!(chain.pass_input_size(0), Some(Size::new(256, 256)));
    assert_eq!(chain.pass_input_size(1), Some(Size::new(256, 256)));
    assert_eq!(chain.pass_input_size(2), Some(Size::new(2048, 2048)));
    assert_eq!(chain.pass_target_size(0), Some(Size::new(256, 256)));
    assert_eq!(chain.pass_target_size(1), Some(Size::new(2048, 2048)));
    assert_eq!(chain.pass_target_size(2), None);

    let data = frame_data(SNES, 1);
    chain.render(&frame(&data, SNES), Rotation::Deg0).unwrap();
    assert_eq!(
        chain.last_frame_outputs(),
        [SNES, Size::new(1920, 1080), Size::new(256, 224)]
    );

    let device = chain.device();
    let draws = device.draws();
    assert_eq!(draws[0].target, device.texture_id("pass 1 input"));
    assert_eq!(draws[0].viewport, Some(Viewport::new(0, 0, 256, 224)));
    assert_eq!(draws[1].target, device.texture_id("pass 2 input"));
    assert_eq!(draws[1].viewport, Some(Viewport::new(0, 0, 1920, 1080)));

    let last = draws[2];
    assert_eq!(last.target, None);
    assert_eq!(last.viewport, Some(FULL_HD));
    assert_eq!(last.value("IN.video_size"), Some(UniformValue::Vec2([1920.0, 1080.0])));
    assert_eq!(last.value("IN.texture_size"), Some(UniformValue::Vec2([2048.0, 2048.0])));
    assert_eq!(last.value("IN.output_size"), Some(UniformValue::Vec2([1920.0, 1080.0])));
    assert_eq!(
        last.value("modelViewProj"),
        Some(UniformValue::Mat4(model_view_proj(FULL_HD.size(), Rotation::Deg0)))
    );
    assert!(device
        .events
        .iter()
        .any(|event| matches!(event, Event::ClearBackBuffer)));
}

#[test]
fn rotation_applies_to_final_pass_only() {
    let programs = Programs::new();
    let mid = programs.write("mid.decl", "sampler IN.texture 0\nuniform modelViewProj\n");
    let config = ChainConfig::new(vec![
        LinkInfo::new(ProgramSource::File(mid), ScaleRule::Input(2.0)),
        LinkInfo::new(ProgramSource::Stock, ScaleRule::Viewport(1.0)),
    ]);
    let mut chain = RenderChain::construct(RecordingDevice::new(), config, FULL_HD).unwrap();
    let data = frame_data(SNES, 1);
    chain.render(&frame(&data, SNES), Rotation::Deg90).unwrap();

    let draws = chain.device().draws();
    assert_eq!(
        draws[0].value("modelViewProj"),
        Some(UniformValue::Mat4(model_view_proj(Size::new(512, 448), Rotation::Deg0)))
    );
    assert_eq!(
        draws[1].value("modelViewProj"),
        Some(UniformValue::Mat4(model_view_proj(FULL_HD.size(), Rotation::Deg90)))
    );
}
