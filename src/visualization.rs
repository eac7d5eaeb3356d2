use anyhow::Result;
use plotters::prelude::*;

use crate::train::StepLosses;

/// Renders the loss history as a log10 line chart.
pub fn draw_loss_curve(history: &[(i64, StepLosses)], output_path: &str) -> Result<()> {
    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let log10 = |v: f64| v.max(1e-12).log10();
    let max_epoch = history.last().map(|(e, _)| *e).unwrap_or(1).max(1);
    let (mut y_min, mut y_max) = (f64::MAX, f64::MIN);
    for (_, losses) in history {
        for v in [losses.total, losses.pde, losses.boundary] {
            y_min = y_min.min(log10(v));
            y_max = y_max.max(log10(v));
        }
    }
    if y_min > y_max {
        (y_min, y_max) = (-1.0, 1.0);
    }

    let mut chart = ChartBuilder::on(&root)
        .caption("Training loss (log10)", ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0i64..max_epoch, (y_min - 0.5)..(y_max + 0.5))?;

    chart
        .configure_mesh()
        .x_desc("epoch")
        .y_desc("log10 loss")
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            history.iter().map(|(e, l)| (*e, log10(l.total))),
            &RED,
        ))?
        .label("total")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

    chart
        .draw_series(LineSeries::new(
            history.iter().map(|(e, l)| (*e, log10(l.pde))),
            &BLUE,
        ))?
        .label("pde")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .draw_series(LineSeries::new(
            history.iter().map(|(e, l)| (*e, log10(l.boundary))),
            &GREEN,
        ))?
        .label("boundary")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], GREEN));

    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .draw()?;

    root.present()?;
    println!("Loss curve saved to {}", output_path);
    Ok(())
}
