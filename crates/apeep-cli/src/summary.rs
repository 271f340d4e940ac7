use std::path::Path;

use apeep_core::pipeline::config::PipelineConfig;
use apeep_core::pipeline::RunSummary;
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }

    fn row(&self, label: &str, value: impl std::fmt::Display) {
        println!("    {:<14}{}", self.label.apply_to(label), self.value.apply_to(value));
    }

    fn section(&self, name: &str, enabled: bool) -> bool {
        if enabled {
            println!("  {}", self.header.apply_to(name));
        } else {
            println!(
                "  {:<16}{}",
                self.header.apply_to(name),
                self.disabled.apply_to("disabled")
            );
            println!();
        }
        enabled
    }
}

pub fn print_pipeline_summary(config: &PipelineConfig, project: &Path, input: &Path) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("apeep"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(5)));
    println!();

    println!(
        "  {:<16}{}",
        s.label.apply_to("Project"),
        s.path.apply_to(project.display())
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Input"),
        s.path.apply_to(input.display())
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Scan rate"),
        s.value.apply_to(format!("{} lines/s", config.acq.scan_per_s))
    );
    println!(
        "  {:<16}{}",
        s.label.apply_to("Top"),
        s.method.apply_to(config.acq.top)
    );
    println!();

    if s.section("Flat-field", config.flat_field.enabled) {
        s.row("Window", format!("{} lines", config.flat_field.window_size));
        s.row("Step", format!("{} lines", config.flat_field.step_size));
        println!();
    }

    if s.section("Enhance", config.enhance.enabled) {
        s.row("Image size", format!("{} lines", config.enhance.image_size));
        s.row(
            "Percentiles",
            format!(
                "{} / {}",
                config.enhance.dark_threshold, config.enhance.light_threshold
            ),
        );
        println!();
    }

    let seg = &config.segment;
    if s.section("Segment", seg.enabled) {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Pipeline"),
            s.method.apply_to(seg.pipeline)
        );
        println!(
            "    {:<14}{}",
            s.label.apply_to("Method"),
            s.method.apply_to(seg.method)
        );
        s.row("Threshold", seg.threshold);
        s.row("Dilate/erode", format!("{} / {}", seg.dilate, seg.erode));
        match seg.max_area {
            Some(max) => s.row("Area", format!("{} < area <= {max}", seg.min_area)),
            None => s.row("Area", format!("> {}", seg.min_area)),
        }
        println!();
    }

    if s.section("Measure", seg.enabled && config.measure.enabled) {
        s.row("Properties", config.measure.properties.len());
        if let Some(px2mm) = config.measure.px2mm {
            s.row("Pixel size", format!("{px2mm} mm"));
        }
        println!();
    }

    if config.subsample.interval > 1 || config.subsample.offset > 0 {
        println!("  {}", s.header.apply_to("Subsample"));
        s.row("Interval", config.subsample.interval);
        s.row("Offset", config.subsample.offset);
        println!();
    }
}

pub fn print_run_summary(summary: &RunSummary) {
    let s = Styles::new();
    println!();
    println!("  {}", s.header.apply_to("Done"));
    s.row("Frames", format!("{} / {}", summary.frames_processed, summary.frames_assembled));
    s.row("Particles", summary.particles);
    s.row("With env.", summary.particles_with_environment);
    s.row("Elapsed", format!("{:.1}s", summary.elapsed.as_secs_f64()));
    println!();
}
