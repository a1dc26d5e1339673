//! End-to-end ring-buffer scenarios driven entirely through the crate's
//! public API, bridging a capture device into a playback device the way an
//! application pulls `get_io` and pushes the result back each cycle.

use approx::assert_relative_eq;
use rstest::rstest;

use rt_audio_core::audio::backend::AudioPacket;
use rt_audio_core::audio::{RingBufferEngine, Side};
use rt_audio_core::time::Timestamp;

fn packet(bytes: &mut [f32], channel_count: u32, frame_count: u32) -> AudioPacket<'_> {
    AudioPacket::new(0, 0, channel_count, frame_count, bytes, Timestamp::ZERO)
}

#[test]
fn cross_device_pass_through_survives_many_cycles() {
    let engine = RingBufferEngine::create(2, 50);
    engine.setup(0, 48_000, 32, 4, 1, 32, 0, 32).unwrap();
    engine.setup(1, 48_000, 32, 4, 0, 32, 1, 32).unwrap();
    engine.enable_pass(0, Side::Input, None, true).unwrap();

    for cycle in 0..6u32 {
        let mut input = vec![0.0f32; 32];
        for (i, sample) in input.iter_mut().enumerate() {
            *sample = (cycle * 32 + i as u32) as f32;
        }
        let packets = [packet(&mut input, 1, 32)];
        engine.update_input(0, &packets).unwrap();

        engine.get_io(0, &[0], 1, &[0]).unwrap();
        engine.advance(0, Side::Input).unwrap();
        engine.advance(1, Side::Output).unwrap();

        let mut out_buf = vec![-1.0f32; 32];
        let mut out_packets = [packet(&mut out_buf, 1, 32)];
        engine.update_output(1, &mut out_packets).unwrap();

        for (i, sample) in out_buf.iter().enumerate() {
            assert_relative_eq!(*sample, (cycle * 32 + i as u32) as f32, epsilon = 1e-6);
        }
    }
}

#[rstest]
#[case(0.25)]
#[case(1.0)]
#[case(2.0)]
fn gain_scaling_survives_get(#[case] gain: f32) {
    let engine = RingBufferEngine::create(1, 50);
    engine.setup(0, 48_000, 16, 4, 1, 16, 1, 16).unwrap();
    engine.set_gain(0, Side::Input, None, gain).unwrap();

    let mut input = vec![1.0f32; 16];
    let packets = [packet(&mut input, 1, 16)];
    engine.update_input(0, &packets).unwrap();

    let got = engine.get(0, Side::Input, &[0]).unwrap();
    let channel = got[0].as_ref().expect("channel 0 enabled");
    for sample in channel {
        assert_relative_eq!(*sample, gain, epsilon = 1e-6);
    }
}

#[test]
fn meter_converges_on_known_amplitude_sine() {
    let engine = RingBufferEngine::create(1, 50);
    engine.setup(0, 48_000, 64, 4, 1, 64, 1, 64).unwrap();
    engine.enable_meter(0, Side::Input, None, true).unwrap();

    let amplitude = 0.8f32;
    let mut phase = 0.0f64;
    for _ in 0..80 {
        let mut input = vec![0.0f32; 64];
        for sample in input.iter_mut() {
            *sample = amplitude * (phase as f32).sin();
            phase += 2.0 * std::f64::consts::PI * 440.0 / 48_000.0;
        }
        let packets = [packet(&mut input, 1, 64)];
        engine.update_input(0, &packets).unwrap();
        engine.advance(0, Side::Input).unwrap();
    }

    let rms = engine.meter_value(0, Side::Input, 0).unwrap();
    assert_relative_eq!(rms, amplitude / std::f32::consts::SQRT_2, epsilon = 0.05);
}

#[test]
fn disabled_input_zeros_the_bridged_output() {
    let engine = RingBufferEngine::create(2, 50);
    engine.setup(0, 48_000, 16, 4, 1, 16, 0, 16).unwrap();
    engine.setup(1, 48_000, 16, 4, 0, 16, 1, 16).unwrap();
    engine.enable_pass(1, Side::Output, None, true).unwrap();
    engine.enable_channel(0, Side::Input, Some(0), false).unwrap();

    let mut input = vec![5.0f32; 16];
    let packets = [packet(&mut input, 1, 16)];
    engine.update_input(0, &packets).unwrap();

    let result = engine.get_io(0, &[0], 1, &[0]).unwrap();
    assert!(result.input[0].is_none());
    assert_eq!(result.output[0].as_ref().unwrap(), &vec![0.0f32; 16]);
}
