use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use ::image::GenericImageView;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tokio::sync::mpsc;

use super::{process::run_tool, ConvertError, ToolPaths};
use crate::job::progress::ProgressUpdate;

pub async fn heic_to_jpg(
    tools: &ToolPaths,
    input: &Path,
    output: &Path,
    quality: u8,
    limit: Duration,
    tx: &mpsc::UnboundedSender<ProgressUpdate>,
) -> Result<(), ConvertError> {
    let args = vec![
        "-q".to_string(),
        quality.to_string(),
        input.display().to_string(),
        output.display().to_string(),
    ];
    run_tool(&tools.heif_convert, &args, limit, tx, |_| None).await?;
    let _ = tx.send(ProgressUpdate::Fraction(1.0));
    Ok(())
}

/// Lays `inputs` out as a PDF with one page per image, in order. Each page is
/// exactly the size of its image, one point per pixel.
pub fn images_to_pdf(
    inputs: &[PathBuf],
    output: &Path,
    tx: &mpsc::UnboundedSender<ProgressUpdate>,
) -> Result<(), ConvertError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(inputs.len());

    for (index, input) in inputs.iter().enumerate() {
        let page_id = add_image_page(&mut doc, pages_id, input)?;
        kids.push(page_id.into());
        let _ = tx.send(ProgressUpdate::Fraction(
            (index + 1) as f32 / inputs.len() as f32,
        ));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    doc.save(output)?;
    Ok(())
}

fn add_image_page(
    doc: &mut Document,
    pages_id: ObjectId,
    input: &Path,
) -> Result<ObjectId, ConvertError> {
    let img = ::image::open(input)?;
    let (width, height) = img.dimensions();

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        img.to_rgb8().into_raw(),
    ));
    let resources_id = doc.add_object(dictionary! {
        "XObject" => dictionary! {
            "Im1" => image_id,
        },
    });
    let content = format!("q\n{} 0 0 {} 0 0 cm\n/Im1 Do\nQ\n", width, height);
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), (width as i64).into(), (height as i64).into()],
        "Resources" => resources_id,
        "Contents" => content_id,
    }))
}
