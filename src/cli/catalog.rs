use console::style;
use crate::catalog;
use crate::errors::BreachlineError;
use crate::render::renderer::render_catalog;
use super::commands::CatalogArgs;
use super::runtime::Runtime;

pub async fn handle_catalog(args: CatalogArgs, quiet: bool) -> Result<(), BreachlineError> {
    let runtime = Runtime::from_args(&args.runtime).await?;
    let raw = runtime.source.fetch().await?;
    let services = catalog::load(&raw)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&services)?);
        return Ok(());
    }

    if !quiet {
        println!(
            "\n{} {} vulnerable services ({})\n",
            style("Catalog:").cyan().bold(),
            style(services.len()).white().bold(),
            style(runtime.source.source_name()).dim(),
        );
    }
    print!("{}", render_catalog(&services));
    Ok(())
}
