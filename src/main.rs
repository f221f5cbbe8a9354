use colored::Colorize;
use hybrid_load_traj::config::Config;
use hybrid_load_traj::*;

/// Load a scenario, plan the hybrid trajectory and export it
fn main() -> Result<(), TrajectoryError> {
    env_logger::builder()
        .parse_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let mut config_str = "config/scenario_a.yaml";
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        println!(
            "[{} hybrid_traj] Usage: {} <scenario.yaml>.",
            "WARN".yellow(),
            args[0]
        );
        println!(
            "[{} hybrid_traj] Loading default scenario: {}",
            "WARN".yellow(),
            config_str
        );
    } else {
        println!(
            "[{} hybrid_traj] Loading scenario: {}",
            "INFO".green(),
            args[1]
        );
        config_str = &args[1];
    }
    let config = Config::from_yaml(config_str)?;
    log::info!(
        "{} keyframes, order {}, minimizing derivative {}",
        config.keyframes.len(),
        config.planner.order,
        config.planner.minimized_derivative_order
    );

    let planner = HybridPlanner::new(config.planner.clone())?;
    let output = match planner.plan(&config.keyframes) {
        Ok(output) => output,
        Err(e) => {
            println!("[{} hybrid_traj] Planning failed: {}", "ERROR".red(), e);
            return Err(e);
        }
    };

    println!(
        "[{} hybrid_traj] {} segments, playback duration {:.3} s",
        "INFO".green(),
        output.segment_count,
        output.playback_duration()
    );
    for record in &output.mode_log {
        println!(
            "    keyframe {:>3}: {} -> {}",
            record.keyframe,
            record.previous.to_string().cyan(),
            record.next.to_string().cyan()
        );
    }
    for (i, (load, quad)) in output
        .load_segments
        .iter()
        .zip(&output.quad_segments)
        .enumerate()
    {
        let end = load.evaluate(1.0, 1);
        println!(
            "    segment {:>3}: {:<5} {:>8.4} s, load ends at {:>9.4} m, {:>9.4} m/s, quad {}",
            i,
            load.mode.to_string(),
            load.duration,
            end[0],
            end[1],
            if quad.is_active() { "active" } else { "inactive" }
        );
    }

    if let Some(path) = &config.output.json {
        output.write_json(path)?;
        println!("[{} hybrid_traj] Wrote {}", "INFO".green(), path);
    }
    if let Some(path) = &config.output.csv {
        output.write_csv(path, config.output.sample_dt)?;
        println!("[{} hybrid_traj] Wrote {}", "INFO".green(), path);
    }
    log::logger().flush();
    Ok(())
}
