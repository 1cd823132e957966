//! Block layout and PDF rendering.
//!
//! Documents are described as a flat list of [`Block`]s. [`layout`] turns them
//! into positioned elements per page using a top-down cursor, and [`render`]
//! draws those with the built-in Helvetica fonts.

use printpdf::{
    image_crate::{self, DynamicImage, GenericImageView, ImageFormat},
    BuiltinFont, Color, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument,
    PdfLayerReference, Rgb,
};

use crate::error::AppError;

const MARGIN: f32 = 20.0;
const LABEL_WIDTH: f32 = 50.0;
const IMAGE_MAX_HEIGHT: f32 = 80.0;
const IMAGE_DPI: f32 = 300.0;
const PT_TO_MM: f32 = 0.3528;
/// Average Helvetica glyph width as a share of the font size.
const GLYPH_RATIO: f32 = 0.5;

const TEXT: &str = "#111827";
const MUTED: &str = "#6B7280";
const ACCENT: &str = "#166534";

pub const PLACEHOLDER: &str = "Image not available";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

pub const A4_PORTRAIT: PageSize = PageSize {
    width: 210.0,
    height: 297.0,
};
pub const A4_LANDSCAPE: PageSize = PageSize {
    width: 297.0,
    height: 210.0,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Title(String),
    Subtitle(String),
    Heading(String),
    Field {
        label: String,
        value: String,
        color: Option<&'static str>,
    },
    Paragraph(String),
    /// `None` draws the placeholder text.
    Image(Option<DynamicImage>),
    Gap,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Font {
    Regular,
    Bold,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element<'a> {
    Text {
        text: String,
        x: f32,
        y: f32,
        size: f32,
        font: Font,
        color: &'static str,
    },
    Image {
        image: &'a DynamicImage,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

impl Block {
    pub fn field(label: &str, value: impl Into<String>) -> Self {
        Self::Field {
            label: label.to_string(),
            value: value.into(),
            color: None,
        }
    }
    pub fn colored_field(label: &str, value: impl Into<String>, color: &'static str) -> Self {
        Self::Field {
            label: label.to_string(),
            value: value.into(),
            color: Some(color),
        }
    }
}

fn line_height(size: f32) -> f32 {
    size * PT_TO_MM * 1.45
}

fn chars_per_line(width: f32, size: f32) -> usize {
    ((width / (size * PT_TO_MM * GLYPH_RATIO)) as usize).max(1)
}

/// The builtin Helvetica faces only cover Latin-1. Typographic punctuation is
/// folded to ASCII and anything else outside that range becomes `?`.
pub fn latin1(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' => '"',
            '\u{2013}' | '\u{2014}' | '\u{2212}' => '-',
            '\u{2022}' => '\u{B7}',
            '\u{20}'..='\u{7E}' | '\u{A0}'..='\u{FF}' => c,
            _ => '?',
        })
        .collect()
}

/// Greedy word wrap; words longer than a line are split.
pub fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            let word: String = word.into_iter().collect();
            let needed = if line.is_empty() {
                word.chars().count()
            } else {
                line.chars().count() + 1 + word.chars().count()
            };
            if needed > max_chars && !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&word);
        }
        lines.push(line);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

struct Cursor<'a> {
    page: PageSize,
    y: f32,
    pages: Vec<Vec<Element<'a>>>,
}

impl<'a> Cursor<'a> {
    fn new(page: PageSize) -> Self {
        Self {
            page,
            y: MARGIN,
            pages: vec![Vec::new()],
        }
    }
    fn bottom(&self) -> f32 {
        self.page.height - MARGIN
    }
    fn content_width(&self) -> f32 {
        self.page.width - 2.0 * MARGIN
    }
    /// Starts a new page when `height` no longer fits above the bottom margin.
    fn reserve(&mut self, height: f32) {
        if self.y + height > self.bottom() && self.y > MARGIN {
            self.pages.push(Vec::new());
            self.y = MARGIN;
        }
    }
    fn push(&mut self, element: Element<'a>) {
        if let Some(page) = self.pages.last_mut() {
            page.push(element);
        }
    }
    fn text(&mut self, text: String, x: f32, size: f32, font: Font, color: &'static str) {
        let height = line_height(size);
        self.reserve(height);
        self.y += height;
        let y = self.y;
        self.push(Element::Text {
            text,
            x,
            y,
            size,
            font,
            color,
        });
    }
}

fn scaled(image: &DynamicImage, max_width: f32) -> (f32, f32) {
    let (px_width, px_height) = image.dimensions();
    let width = px_width.max(1) as f32 / IMAGE_DPI * 25.4;
    let height = px_height.max(1) as f32 / IMAGE_DPI * 25.4;
    let factor = (max_width / width).min(IMAGE_MAX_HEIGHT / height);
    (width * factor, height * factor)
}

/// Positions every block top-down; `y` values are distances from the top
/// edge of the page to the text baseline or image bottom.
pub fn layout(blocks: &[Block], page: PageSize) -> Vec<Vec<Element<'_>>> {
    let mut cursor = Cursor::new(page);

    for block in blocks {
        match block {
            Block::Title(title) => {
                let size = 20.0;
                for line in wrap(title, chars_per_line(cursor.content_width(), size)) {
                    cursor.text(line, MARGIN, size, Font::Bold, ACCENT);
                }
            }
            Block::Subtitle(subtitle) => cursor.text(subtitle.clone(), MARGIN, 10.0, Font::Regular, MUTED),
            Block::Heading(heading) => {
                cursor.reserve(line_height(14.0) * 3.0);
                cursor.y += 4.0;
                cursor.text(heading.clone(), MARGIN, 14.0, Font::Bold, TEXT);
            }
            Block::Field { label, value, color } => {
                let size = 11.0;
                let value_x = MARGIN + LABEL_WIDTH;
                let width = cursor.content_width() - LABEL_WIDTH;
                let lines = wrap(value, chars_per_line(width, size));
                for (index, line) in lines.into_iter().enumerate() {
                    cursor.text(line, value_x, size, Font::Regular, color.unwrap_or(TEXT));
                    if index == 0 {
                        let y = cursor.y;
                        cursor.push(Element::Text {
                            text: label.clone(),
                            x: MARGIN,
                            y,
                            size: 10.0,
                            font: Font::Bold,
                            color: MUTED,
                        });
                    }
                }
            }
            Block::Paragraph(text) => {
                let size = 11.0;
                for line in wrap(text, chars_per_line(cursor.content_width(), size)) {
                    cursor.text(line, MARGIN, size, Font::Regular, TEXT);
                }
            }
            Block::Image(Some(image)) => {
                let (width, height) = scaled(image, cursor.content_width());
                cursor.reserve(height + 2.0);
                cursor.y += height + 2.0;
                let y = cursor.y;
                cursor.push(Element::Image {
                    image,
                    x: MARGIN,
                    y,
                    width,
                    height,
                });
            }
            Block::Image(None) => {
                cursor.text(PLACEHOLDER.to_string(), MARGIN, 10.0, Font::Regular, MUTED);
            }
            Block::Gap => cursor.y += 4.0,
        }
    }
    cursor.pages
}

/// Tries PNG first and JPEG second. Alpha is dropped because the PDF writer
/// embeds RGB only.
pub fn decode_image(bytes: &[u8]) -> Option<DynamicImage> {
    let image = image_crate::load_from_memory_with_format(bytes, ImageFormat::Png)
        .or_else(|_| image_crate::load_from_memory_with_format(bytes, ImageFormat::Jpeg))
        .ok()?;
    Some(DynamicImage::ImageRgb8(image.to_rgb8()))
}

pub fn hex_color(hex: &str) -> Color {
    let hex = hex.trim_start_matches('#');
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|value| u8::from_str_radix(value, 16).ok())
            .map_or(0.0, |value| value as f32 / 255.0)
    };
    Color::Rgb(Rgb::new(channel(0..2), channel(2..4), channel(4..6), None))
}

fn draw(
    layer: &PdfLayerReference,
    element: &Element<'_>,
    page: PageSize,
    regular: &IndirectFontRef,
    bold: &IndirectFontRef,
) {
    match element {
        Element::Text {
            text,
            x,
            y,
            size,
            font,
            color,
        } => {
            layer.set_fill_color(hex_color(color));
            let font = match font {
                Font::Regular => regular,
                Font::Bold => bold,
            };
            layer.use_text(latin1(text), *size, Mm(*x), Mm(page.height - y), font);
        }
        Element::Image {
            image,
            x,
            y,
            width,
            height,
        } => {
            let (px_width, px_height) = image.dimensions();
            let natural_width = px_width.max(1) as f32 / IMAGE_DPI * 25.4;
            let natural_height = px_height.max(1) as f32 / IMAGE_DPI * 25.4;
            Image::from_dynamic_image(image).add_to_layer(
                layer.clone(),
                ImageTransform {
                    translate_x: Some(Mm(*x)),
                    translate_y: Some(Mm(page.height - y)),
                    scale_x: Some(width / natural_width),
                    scale_y: Some(height / natural_height),
                    dpi: Some(IMAGE_DPI),
                    ..Default::default()
                },
            );
        }
    }
}

pub fn render(title: &str, blocks: &[Block], page: PageSize) -> Result<Vec<u8>, AppError> {
    let pages = layout(blocks, page);
    let (doc, first_page, first_layer) =
        PdfDocument::new(title, Mm(page.width), Mm(page.height), "Layer 1");
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|error| AppError::Export(error.to_string()))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|error| AppError::Export(error.to_string()))?;

    for (index, elements) in pages.iter().enumerate() {
        let (page_index, layer_index) = if index == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(Mm(page.width), Mm(page.height), "Layer 1")
        };
        let layer = doc.get_page(page_index).get_layer(layer_index);
        for element in elements {
            draw(&layer, element, page, &regular, &bold);
        }
    }

    tracing::debug!(title, pages = pages.len(), "pdf rendered");
    doc.save_to_bytes()
        .map_err(|error| AppError::Export(error.to_string()))
}
