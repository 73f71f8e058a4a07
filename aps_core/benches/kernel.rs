use aps_core::config::EngineCfg;
use aps_core::estimator::AdaptivePkPdEstimator;
use aps_core::kernel::InsulinActivityKernel;
use aps_core::smb::SmbDecisionPipeline;
use aps_core::types::{
    ActivityStage, BgSnapshot, LoopContext, LoopProfile, ModeState, PkPdSnapshot, PumpCaps,
};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

fn sample_context(bg: f64) -> LoopContext {
    LoopContext {
        bg: BgSnapshot {
            mgdl: bg,
            delta5: 2.0,
            short_avg_delta: 2.0,
            long_avg_delta: 1.0,
            accel: 0.0,
            r2: 0.9,
            combined_delta: 4.0,
            epoch_millis: 0,
        },
        iob_u: 1.0,
        cob_g: 0.0,
        profile: LoopProfile {
            target_mgdl: 100.0,
            isf_mgdl_per_u: 50.0,
            basal_uph: 1.0,
            hypo_guard_mgdl: 70.0,
        },
        pump: PumpCaps {
            basal_step_uph: 0.05,
            bolus_step_u: 0.05,
            min_duration_min: 30,
            max_basal_uph: 4.0,
            max_smb_u: 2.0,
        },
        modes: ModeState::default(),
        tdd_24h_u: 40.0,
        eventual_bg_mgdl: bg + 20.0,
        predicted_bg_mgdl: bg,
        now_epoch_millis: 0,
        last_bolus_epoch_millis: Some(-45 * 60_000),
        kalman_isf: None,
        kalman_trust: 0.0,
        max_iob_u: 4.0,
        adjusters: Vec::new(),
    }
}

pub fn bench_kernel_and_pipeline(c: &mut Criterion) {
    let mut g = c.benchmark_group("dosing");
    // Allow quick tweaking without CLI flags (Criterion 0.5):
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p aps_core --bench kernel
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(1));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }

    let kernel = InsulinActivityKernel::with_params(360.0, 75.0, 0.5);
    g.bench_function("normalized_cdf_sweep", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for i in 0..=72 {
                acc += kernel.normalized_cdf(black_box(i as f64 * 5.0));
            }
            black_box(acc);
        })
    });

    g.bench_function("cdf_inverse_bisection", |b| {
        b.iter(|| {
            for &p in &[0.1, 0.25, 0.5, 0.75, 0.9] {
                black_box(kernel.find_time_for_normalized_cdf(black_box(p)));
            }
        })
    });

    let cfg = EngineCfg::default();
    let pipeline = SmbDecisionPipeline::new(&cfg);
    let estimator =
        AdaptivePkPdEstimator::new(&cfg.kernel, cfg.estimator.clone());
    let pkpd = PkPdSnapshot {
        dia_min: 360.0,
        peak_min: 75.0,
        fused_isf: 50.0,
        tail_fraction: 0.2,
        stage: ActivityStage::Peak,
        relative_activity: 0.9,
        post_window_fraction: 0.3,
    };
    for &bg in &[130.0f64, 180.0, 250.0] {
        let ctx = sample_context(bg);
        let k = estimator.kernel();
        g.bench_function(format!("smb_pipeline_bg_{bg}"), |b| {
            b.iter_batched(
                aps_core::audit::AuditTrail::new,
                |mut trail| {
                    let out =
                        pipeline.decide(black_box(&ctx), &pkpd, &k, 50.0, 1.0, None, None, &mut trail);
                    black_box(out.units);
                },
                BatchSize::SmallInput,
            )
        });
    }
    g.finish();
}

criterion_group!(kernel_benches, bench_kernel_and_pipeline);
criterion_main!(kernel_benches);
