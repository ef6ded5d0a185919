//! `corral pull | images`: Image service.

use clap::Args;
use corral_common::context::OpContext;
use corral_runtime::backend::{Backend, RuntimeBackend};

use crate::output::{self, OutputFormat};

/// Arguments for the `pull` command.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Image reference.
    pub image: String,
}

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Describe this image instead of listing all.
    pub image: Option<String>,

    /// Print IDs only.
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

/// Executes the `pull` command.
///
/// # Errors
///
/// Returns an error if the image cannot be fetched.
pub fn pull(backend: &Backend, ctx: &OpContext, args: &PullArgs) -> anyhow::Result<()> {
    let reference = backend.pull_image(ctx, &args.image)?;
    println!("Image is up to date for {reference}");
    Ok(())
}

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if the image store cannot be read or the named image is
/// absent.
pub fn list(backend: &Backend, ctx: &OpContext, args: &ImagesArgs) -> anyhow::Result<()> {
    if let Some(image) = &args.image {
        let info = backend
            .image_status(ctx, image)?
            .ok_or_else(|| anyhow::anyhow!("image {image} not found"))?;
        return output::print_json(&info);
    }

    let images = backend.list_images(ctx)?;
    if args.output == OutputFormat::Json {
        return output::print_json(&images);
    }
    if args.quiet {
        for image in &images {
            println!("{}", image.id);
        }
        return Ok(());
    }
    println!("{:<40} {:<24} {:<10}", "IMAGE", "IMAGE ID", "SIZE");
    for image in &images {
        let tags = if image.repo_tags.is_empty() {
            "<none>".to_string()
        } else {
            image.repo_tags.join(",")
        };
        println!(
            "{:<40} {:<24} {:<10}",
            tags,
            output::truncate(&image.id, 24),
            output::format_bytes(image.size_bytes)
        );
    }
    Ok(())
}
