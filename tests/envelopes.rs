use tproc_asm::error::ValidationError;
use tproc_asm::{Error, Program, SocConfig};

fn prog() -> Program {
    Program::new(SocConfig::default()).unwrap()
}

#[test]
fn addresses_are_cumulative_per_channel() {
    let mut p = prog();
    p.add_gauss(0, "g", 2.0, 4, None, false).unwrap();
    p.add_triangle(0, "t", 2, None).unwrap();
    p.add_triangle(1, "t", 2, None).unwrap();

    let lib = p.envelopes(0).unwrap();
    assert_eq!(lib.get("g").unwrap().addr, 0);
    assert_eq!(lib.get("g").unwrap().len(), 64);
    assert_eq!(lib.get("t").unwrap().addr, 64);
    assert_eq!(p.envelopes(1).unwrap().get("t").unwrap().addr, 0);
    assert_eq!(p.envelope_image(0).unwrap().len(), 96);
    assert!(p.envelope_image(2).unwrap().is_empty());
}

#[test]
fn generated_envelopes_stay_within_full_scale() {
    let mut p = prog();
    p.add_gauss(0, "g", 3.0, 4, None, false).unwrap();
    let g = p.envelopes(0).unwrap().get("g").unwrap();
    let peak = g.idata.iter().map(|s| i32::from(*s).abs()).max().unwrap();
    assert_eq!(peak, 32766);
    assert!(g.qdata.iter().all(|&q| q == 0));
}

#[test]
fn bad_envelopes_are_rejected_without_side_effects() {
    let mut p = prog();
    assert_eq!(
        p.add_envelope(0, "none", None, None).unwrap_err(),
        Error::Validation(ValidationError::EmptyEnvelope("none".into()))
    );
    assert_eq!(
        p.add_envelope(0, "ragged", Some(&[0.0; 16]), Some(&[0.0; 32])).unwrap_err(),
        Error::Validation(ValidationError::EnvelopeShape { name: "ragged".into(), i: 16, q: 32 })
    );
    // not a whole number of clocks
    assert!(matches!(p.add_envelope(0, "short", Some(&[0.0; 10]), None), Err(Error::Range(_))));
    assert!(matches!(p.add_envelope(0, "loud", Some(&[40000.0; 16]), None), Err(Error::Range(_))));

    p.add_envelope(0, "ok", Some(&[100.0; 16]), None).unwrap();
    assert_eq!(p.envelopes(0).unwrap().get("ok").unwrap().addr, 0);
    assert!(matches!(
        p.add_envelope(0, "ok", Some(&[1.0; 16]), None),
        Err(Error::Validation(ValidationError::DuplicateName { .. }))
    ));
}

#[test]
fn unknown_channel() {
    let mut p = prog();
    assert!(p.add_gauss(42, "g", 2.0, 4, None, false).is_err());
    assert!(p.envelopes(42).is_err());
}

#[test]
fn even_length_rounds_odd_gaussians_down() {
    let mut p = prog();
    p.add_gauss(0, "odd", 2.0, 7, None, false).unwrap();
    p.add_gauss(0, "even", 2.0, 7, None, true).unwrap();
    p.add_gauss(0, "kept", 2.0, 8, None, true).unwrap();
    let lib = p.envelopes(0).unwrap();
    assert_eq!(lib.get("odd").unwrap().len(), 7 * 16);
    assert_eq!(lib.get("even").unwrap().len(), 6 * 16);
    assert_eq!(lib.get("kept").unwrap().len(), 8 * 16);
}
