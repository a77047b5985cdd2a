use pretty_assertions::assert_eq;
use serde_json::json;

use tproc_asm::config::deg2reg;
use tproc_asm::error::ValidationError;
use tproc_asm::wave::{cfg2reg, OutSel, RunMode, Wave};
use tproc_asm::{ChannelId, Error, Program, PulseParams, PulseStyle, SocConfig, Time};

fn base() -> PulseParams {
    PulseParams { freq: Some(250.0), phase: Some(90.0), gain: Some(0.5), ..Default::default() }
}

fn prog() -> Program {
    Program::new(SocConfig::default()).unwrap()
}

#[test]
fn const_pulse_is_one_dds_wave() {
    let mut p = prog();
    p.add_pulse(0, "c", PulseStyle::Const, &PulseParams { length: Some(10), ..base() }).unwrap();
    let pulse = p.pulse_def(0, "c").unwrap();
    let cfg = p.config();
    assert_eq!(
        pulse.waves,
        vec![Wave {
            freq: cfg.freq2reg(0, 250.0).unwrap(),
            phase: deg2reg(90.0).unwrap(),
            env: 0,
            gain: cfg.gain2reg(0, 0.5).unwrap(),
            length: 10,
            conf: cfg2reg(Some(OutSel::Dds), None, None, None),
        }]
    );
    assert_eq!(pulse.length, 10);
    assert_eq!(p.waves().index_of("g0_c_w0"), Some(0));
}

#[test]
fn arb_pulse_points_at_its_envelope() {
    let mut p = prog();
    p.add_triangle(2, "pad", 2, None).unwrap();
    p.add_gauss(2, "g", 2.0, 4, None, false).unwrap();
    let params = PulseParams { envelope: Some("g".into()), phrst: Some(true), ..base() };
    p.add_pulse(2, "a", PulseStyle::Arb, &params).unwrap();

    let w = p.pulse_def(2, "a").unwrap().waves[0];
    assert_eq!((w.env, w.length), (2, 4));
    assert_eq!(w.conf, cfg2reg(Some(OutSel::Product), None, None, Some(true)));
}

#[test]
fn flat_top_splits_the_envelope_around_a_flat_segment() {
    let mut p = prog();
    p.add_gauss(0, "g", 2.0, 7, None, false).unwrap();
    let params = PulseParams { envelope: Some("g".into()), length: Some(20), ..base() };
    p.add_pulse(0, "ft", PulseStyle::FlatTop, &params).unwrap();

    let pulse = p.pulse_def(0, "ft").unwrap();
    let gain = p.config().gain2reg(0, 0.5).unwrap();
    let shape: Vec<_> = pulse.waves.iter().map(|w| (w.env, w.length, w.gain, w.conf)).collect();
    let ramp = cfg2reg(Some(OutSel::Product), Some(RunMode::Oneshot), None, None);
    let flat = cfg2reg(Some(OutSel::Dds), Some(RunMode::Oneshot), None, None);
    assert_eq!(shape, vec![(0, 3, gain, ramp), (0, 20, gain / 2, flat), (4, 3, gain, ramp)]);
    assert_eq!(pulse.offsets, vec![0, 3, 23]);
    assert_eq!(pulse.length, 26);

    let start = p.pulse(0, "ft", Time::At(100)).unwrap();
    assert_eq!(start, 100);
    assert_eq!(p.timestamp(ChannelId::Gen(0)).unwrap(), 126);
    let times: Vec<String> = p.instructions().iter().filter_map(|i| i.comment.clone()).collect();
    assert_eq!(times, vec!["g0 ft w0 @t = 100", "g0 ft w1 @t = 103", "g0 ft w2 @t = 123"]);
}

#[test]
fn parameter_sets_are_checked_per_style() {
    let mut p = prog();
    let err = p.add_pulse(0, "x", PulseStyle::Const, &base()).unwrap_err();
    assert_eq!(
        err,
        Error::Validation(ValidationError::MissingParams { style: "const", missing: vec!["length".into()] })
    );
    let err = p
        .add_pulse(0, "x", PulseStyle::FlatTop, &PulseParams { mode: Some(RunMode::Periodic), length: Some(5), envelope: Some("g".into()), ..base() })
        .unwrap_err();
    assert!(matches!(err, Error::Validation(ValidationError::UnsupportedParams { .. })));
    assert!(p.waves().is_empty());
}

#[test]
fn missing_envelope_and_short_waves_fail() {
    let mut p = prog();
    let arb = PulseParams { envelope: Some("nope".into()), ..base() };
    assert!(matches!(
        p.add_pulse(0, "a", PulseStyle::Arb, &arb),
        Err(Error::Validation(ValidationError::UnknownName { kind: "envelope", .. }))
    ));
    assert!(matches!(
        p.add_pulse(0, "c", PulseStyle::Const, &PulseParams { length: Some(2), ..base() }),
        Err(Error::Range(_))
    ));
    assert!(p.pulse_def(0, "c").is_none());
}

#[test]
fn duplicate_pulse_names_are_per_channel() {
    let mut p = prog();
    let c = PulseParams { length: Some(10), ..base() };
    p.add_pulse(0, "c", PulseStyle::Const, &c).unwrap();
    p.add_pulse(1, "c", PulseStyle::Const, &c).unwrap();
    assert!(p.add_pulse(0, "c", PulseStyle::Const, &c).is_err());
    assert_eq!(p.waves().len(), 2);
}

#[test]
fn loosely_typed_parameters() {
    let map = json!({"style": "flat_top", "freq": 10, "phase": 0, "gain": 0.25, "length": 12, "envelope": "g", "stdysel": "last"});
    let (style, params) = PulseParams::from_map(map.as_object().unwrap()).unwrap();
    assert_eq!(style, PulseStyle::FlatTop);
    assert_eq!(params.length, Some(12));
    assert!(PulseParams::from_map(json!({"freq": 1}).as_object().unwrap()).is_err());
    assert!(PulseParams::from_map(json!({"style": "square"}).as_object().unwrap()).is_err());
}
