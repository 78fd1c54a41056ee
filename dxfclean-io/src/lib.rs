use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use dxfclean_core::{
    color::{EntityColor, Rgb},
    drawing::{
        Arc, BlockDefinition, BlockReference, Circle, Drawing, Ellipse, Entity, Layer, Line,
        MText, PointEntity, Polyline, PolylineVertex, Spline, Text,
    },
    geometry::{Point2, Transform2D, Vector2},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// 二进制 DXF 的文件头标记。
const BINARY_SENTINEL: &[u8] = b"AutoCAD Binary DXF\r\n\x1a\0";

#[derive(Debug, Error)]
pub enum IoError {
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
    #[error("binary DXF files are not supported, export as ASCII DXF")]
    BinaryDxf,
    #[error("document is not valid UTF-8: {0}")]
    Encoding(#[source] std::str::Utf8Error),
}

impl From<DxfError> for IoError {
    fn from(err: DxfError) -> Self {
        match err {
            DxfError::Unsupported { feature } => IoError::UnsupportedFeature(feature),
            DxfError::Invalid { message } => IoError::InvalidDocument(message),
        }
    }
}

/// 解析模式。`Recover` 会修复或跳过轻微的结构损坏，而不是在第一个错误处终止。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    Strict,
    #[default]
    Recover,
}

/// 恢复模式下的一条修复记录。`line` 为 0 表示与具体行无关。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub line: usize,
    pub message: String,
}

/// 解析过程的审计结果：已修复的问题以及被跳过的不支持实体。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    entries: Vec<AuditEntry>,
    unsupported: BTreeMap<String, usize>,
}

impl AuditReport {
    pub fn record(&mut self, line: usize, message: impl Into<String>) {
        self.entries.push(AuditEntry {
            line,
            message: message.into(),
        });
    }

    pub fn note_unsupported(&mut self, kind: &str) {
        *self.unsupported.entry(kind.to_string()).or_insert(0) += 1;
    }

    #[inline]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// 实体类型 → 被跳过的数量。
    #[inline]
    pub fn unsupported(&self) -> &BTreeMap<String, usize> {
        &self.unsupported
    }

    #[inline]
    pub fn fix_count(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 一次读取的结果。
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub drawing: Drawing,
    pub audit: AuditReport,
}

pub trait DrawingLoader {
    fn load(&self, path: &Path) -> Result<Drawing, IoError>;
    fn load_bytes(&self, bytes: &[u8]) -> Result<Drawing, IoError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DxfFacade {
    mode: ReadMode,
}

impl DxfFacade {
    /// 默认使用恢复模式。
    pub fn new() -> Self {
        Self::with_mode(ReadMode::Recover)
    }

    pub fn strict() -> Self {
        Self::with_mode(ReadMode::Strict)
    }

    pub fn with_mode(mode: ReadMode) -> Self {
        Self { mode }
    }

    #[inline]
    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    pub fn read_bytes(&self, bytes: &[u8]) -> Result<ReadOutcome, IoError> {
        if bytes.starts_with(BINARY_SENTINEL) {
            return Err(IoError::BinaryDxf);
        }

        let (text, lossy) = match std::str::from_utf8(bytes) {
            Ok(text) => (Cow::Borrowed(text), false),
            Err(err) => match self.mode {
                ReadMode::Strict => return Err(IoError::Encoding(err)),
                ReadMode::Recover => (String::from_utf8_lossy(bytes), true),
            },
        };
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
        if text.trim().is_empty() {
            return Err(IoError::InvalidDocument("输入为空".to_string()));
        }

        let mut outcome = DxfParser::new(text, self.mode).parse()?;
        if lossy {
            warn!("DXF 含有非 UTF-8 字节，已按替换字符解码");
            outcome
                .audit
                .entries
                .insert(0, AuditEntry {
                    line: 0,
                    message: "非 UTF-8 字节已替换为 U+FFFD".to_string(),
                });
        }
        info!(
            mode = ?self.mode,
            entities = outcome.drawing.entity_count(),
            blocks = outcome.drawing.blocks().count(),
            fixes = outcome.audit.fix_count(),
            "DXF 解析完成"
        );
        Ok(outcome)
    }
}

impl DrawingLoader for DxfFacade {
    fn load(&self, path: &Path) -> Result<Drawing, IoError> {
        let data = fs::read(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_bytes(&data)
    }

    fn load_bytes(&self, bytes: &[u8]) -> Result<Drawing, IoError> {
        self.read_bytes(bytes).map(|outcome| outcome.drawing)
    }
}

#[derive(Debug)]
enum DxfError {
    Unsupported { feature: String },
    Invalid { message: String },
}

impl DxfError {
    fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// 实体通用字段：图层、颜色、可见性、所属空间与拉伸方向。
#[derive(Debug, Default)]
struct CommonFields {
    layer: Option<String>,
    color: Option<EntityColor>,
    true_color: Option<Rgb>,
    invisible: bool,
    paper_space: bool,
    extrusion_z: Option<f64>,
}

impl CommonFields {
    fn accept(&mut self, code: i32, value: &str, kind: &str) -> Result<bool, DxfError> {
        match code {
            8 => self.layer = Some(value.trim().to_string()),
            62 => {
                let raw = parse_i32(value, &format!("{kind} 颜色（组码 62）"))?;
                self.color = Some(EntityColor::from_aci_code(raw));
            }
            420 => {
                let raw = parse_i32(value, &format!("{kind} 真彩色（组码 420）"))?;
                self.true_color = Some(Rgb::from_true_color(raw));
            }
            60 => self.invisible = parse_i32(value, &format!("{kind} 可见性（组码 60）"))? != 0,
            67 => self.paper_space = parse_i32(value, &format!("{kind} 空间标志（组码 67）"))? != 0,
            230 => self.extrusion_z = Some(parse_f64(value, &format!("{kind} 拉伸方向 Z（组码 230）"))?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn layer(&self) -> String {
        self.layer
            .clone()
            .filter(|layer| !layer.is_empty())
            .unwrap_or_else(|| "0".to_string())
    }

    fn color(&self) -> EntityColor {
        match self.true_color {
            Some(rgb) => EntityColor::Rgb(rgb),
            None => self.color.unwrap_or(EntityColor::ByLayer),
        }
    }

    /// 只保留模型空间中的可见实体；OCS 实体在拉伸方向为 -Z 时镜像 X 轴。
    fn finish(&self, entity: Entity, uses_ocs: bool) -> Vec<Entity> {
        if self.invisible || self.paper_space {
            return Vec::new();
        }
        if uses_ocs && self.extrusion_z.is_some_and(|z| z < 0.0) {
            let mirror = Transform2D::from_insert(
                Point2::new(0.0, 0.0),
                Vector2::new(-1.0, 1.0),
                0.0,
                Point2::new(0.0, 0.0),
            );
            return vec![entity.transformed(&mirror)];
        }
        vec![entity]
    }
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
    mode: ReadMode,
    saw_section: bool,
}

impl<'a> DxfParser<'a> {
    fn new(source: &'a str, mode: ReadMode) -> Self {
        Self {
            reader: DxfReader::new(source, mode),
            mode,
            saw_section: false,
        }
    }

    fn parse(mut self) -> Result<ReadOutcome, DxfError> {
        let mut drawing = Drawing::new();
        while let Some((code, value)) = self.reader.next_pair()? {
            if code != 0 {
                self.recoverable(format!("意外的组码 {code}（期望 0 表示 SECTION/EOF）"))?;
                continue;
            }
            match value.trim() {
                "SECTION" => {
                    let name = match self.reader.next_pair()? {
                        Some((2, name)) => name.trim().to_string(),
                        Some((name_code, name)) => {
                            self.recoverable(format!(
                                "SECTION 名称使用了组码 {name_code}（期望 2）"
                            ))?;
                            self.reader.put_back((name_code, name));
                            continue;
                        }
                        None => {
                            self.recoverable("SECTION 缺少名称（组码 2）")?;
                            break;
                        }
                    };
                    self.saw_section = true;
                    debug!(section = %name, line = self.reader.line_number, "进入 SECTION");
                    match name.as_str() {
                        "HEADER" => self.parse_header(&mut drawing)?,
                        "TABLES" => self.parse_tables(&mut drawing)?,
                        "BLOCKS" => self.parse_blocks(&mut drawing)?,
                        "ENTITIES" => self.parse_entities(&mut drawing)?,
                        _ => self.skip_section(&name)?,
                    }
                }
                "EOF" => break,
                unexpected => {
                    self.recoverable(format!("意外的标记 {unexpected}，期望 SECTION 或 EOF"))?;
                }
            }
        }

        if !self.saw_section {
            return Err(DxfError::invalid("未找到任何 SECTION，输入不是 DXF 文档"));
        }

        Ok(ReadOutcome {
            drawing,
            audit: self.reader.audit,
        })
    }

    /// 严格模式下转为错误；恢复模式下记录审计信息并继续。
    fn recoverable(&mut self, message: impl Into<String>) -> Result<(), DxfError> {
        let message = message.into();
        match self.mode {
            ReadMode::Strict => Err(DxfError::invalid(message)),
            ReadMode::Recover => {
                let line = self.reader.line_number;
                warn!(line, "{message}");
                self.reader.audit.record(line, message);
                Ok(())
            }
        }
    }

    fn tolerate(&mut self, err: DxfError) -> Result<(), DxfError> {
        match err {
            DxfError::Invalid { message } => self.recoverable(message),
            unsupported => Err(unsupported),
        }
    }

    /// 读取段内下一个记录名（组码 0）。段结束或缺少 ENDSEC 时返回 `None`。
    fn next_record(&mut self, section: &str) -> Result<Option<String>, DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    let record = value.trim().to_string();
                    match record.as_str() {
                        "ENDSEC" => return Ok(None),
                        "SECTION" | "EOF" => {
                            self.recoverable(format!("{section} 段缺少 ENDSEC 终止标记"))?;
                            self.reader.put_back((0, value));
                            return Ok(None);
                        }
                        _ => return Ok(Some(record)),
                    }
                }
                Some((code, _)) => {
                    self.recoverable(format!(
                        "{section} 段遇到组码 {code}（期望 0 表示记录起始）"
                    ))?;
                }
                None => {
                    self.recoverable(format!("{section} 段提前结束"))?;
                    return Ok(None);
                }
            }
        }
    }

    fn skip_section(&mut self, name: &str) -> Result<(), DxfError> {
        while self.next_record(name)?.is_some() {
            self.skip_entity_body()?;
        }
        Ok(())
    }

    fn parse_header(&mut self, drawing: &mut Drawing) -> Result<(), DxfError> {
        let mut variable: Option<String> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    if value.trim() != "ENDSEC" {
                        self.recoverable("HEADER 段缺少 ENDSEC 终止标记")?;
                        self.reader.put_back((0, value));
                    }
                    break;
                }
                Some((9, name)) => variable = Some(name.trim().to_string()),
                Some((code, value)) => match (variable.as_deref(), code) {
                    (Some("$ACADVER"), 1) => {
                        drawing.header_mut().acad_version = Some(value.trim().to_string());
                    }
                    (Some("$INSUNITS"), 70) => match parse_i16(&value, "$INSUNITS（组码 70）") {
                        Ok(units) => drawing.header_mut().insunits = Some(units),
                        Err(err) => self.tolerate(err)?,
                    },
                    _ => {}
                },
                None => {
                    self.recoverable("HEADER 段提前结束")?;
                    break;
                }
            }
        }
        Ok(())
    }

    fn parse_tables(&mut self, drawing: &mut Drawing) -> Result<(), DxfError> {
        while let Some(record) = self.next_record("TABLES")? {
            match record.as_str() {
                "LAYER" => match self.parse_layer_record() {
                    Ok(layer) => drawing.add_layer(layer),
                    Err(err) => {
                        self.tolerate(err)?;
                        self.skip_entity_body()?;
                    }
                },
                _ => self.skip_entity_body()?,
            }
        }
        Ok(())
    }

    fn parse_layer_record(&mut self) -> Result<Layer, DxfError> {
        let mut name: Option<String> = None;
        let mut color = EntityColor::FOREGROUND;
        let mut true_color: Option<Rgb> = None;
        let mut is_visible = true;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    2 => name = Some(value.trim().to_string()),
                    62 => {
                        let raw = parse_i32(&value, "LAYER 颜色（组码 62）")?;
                        // 负值表示图层关闭
                        if raw < 0 {
                            is_visible = false;
                        }
                        color = EntityColor::from_aci_code(raw);
                    }
                    70 => {
                        let flags = parse_i32(&value, "LAYER 标志（组码 70）")?;
                        if flags & 0x01 != 0 {
                            is_visible = false;
                        }
                    }
                    420 => {
                        true_color = Some(Rgb::from_true_color(parse_i32(
                            &value,
                            "LAYER 真彩色（组码 420）",
                        )?));
                    }
                    _ => {}
                },
                None => return Err(DxfError::invalid("LAYER 记录未正确结束")),
            }
        }

        let name = name.ok_or_else(|| DxfError::invalid("LAYER 缺少名称（组码 2）"))?;
        if let Some(rgb) = true_color {
            color = EntityColor::Rgb(rgb);
        }
        let mut layer = Layer::new(name).with_color(color);
        layer.is_visible = is_visible;
        Ok(layer)
    }

    fn parse_blocks(&mut self, drawing: &mut Drawing) -> Result<(), DxfError> {
        while let Some(record) = self.next_record("BLOCKS")? {
            match record.as_str() {
                "BLOCK" => match self.parse_block_definition() {
                    Ok(Some(definition)) => drawing.add_block_definition(definition),
                    Ok(None) => {}
                    Err(err) => {
                        self.tolerate(err)?;
                        self.skip_entity_body()?;
                    }
                },
                _ => self.skip_entity_body()?,
            }
        }
        Ok(())
    }

    fn parse_block_definition(&mut self) -> Result<Option<BlockDefinition>, DxfError> {
        let mut name: Option<String> = None;
        let mut base_x: f64 = 0.0;
        let mut base_y: f64 = 0.0;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    2 => name = Some(value.trim().to_string()),
                    10 => base_x = parse_f64(&value, "BLOCK 基点 X")?,
                    20 => base_y = parse_f64(&value, "BLOCK 基点 Y")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("BLOCK 未正确结束")),
            }
        }

        let name = name.ok_or_else(|| DxfError::invalid("BLOCK 缺少名称（组码 2）"))?;
        // 模型/图纸空间块的内容已在 ENTITIES 段中出现
        let lowered = name.to_ascii_lowercase();
        let collect_entities =
            !(lowered.starts_with("*model_space") || lowered.starts_with("*paper_space"));

        let mut entities: Vec<Entity> = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "ENDBLK" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    "ENDSEC" | "SECTION" | "EOF" => {
                        self.recoverable(format!("BLOCK {name} 缺少 ENDBLK 终止标记"))?;
                        self.reader.put_back((0, value));
                        break;
                    }
                    kind => {
                        if collect_entities {
                            let kind = kind.to_string();
                            entities.extend(self.read_entities(&kind)?);
                        } else {
                            self.skip_entity_body()?;
                        }
                    }
                },
                Some((code, _)) => {
                    self.recoverable(format!("BLOCK {name} 内遇到组码 {code}（期望 0）"))?;
                }
                None => {
                    self.recoverable(format!("BLOCK {name} 未找到 ENDBLK 终止标记"))?;
                    break;
                }
            }
        }

        if !collect_entities {
            return Ok(None);
        }

        Ok(Some(BlockDefinition {
            name,
            base_point: Point2::new(base_x, base_y),
            entities,
        }))
    }

    fn parse_entities(&mut self, drawing: &mut Drawing) -> Result<(), DxfError> {
        while let Some(kind) = self.next_record("ENTITIES")? {
            for entity in self.read_entities(&kind)? {
                drawing.add_entity(entity);
            }
        }
        Ok(())
    }

    /// 读取一个实体记录；不支持的类型被跳过，恢复模式下损坏的实体被丢弃。
    fn read_entities(&mut self, kind: &str) -> Result<Vec<Entity>, DxfError> {
        let start_line = self.reader.line_number;
        match self.parse_entity(kind) {
            Ok(entities) => Ok(entities),
            Err(DxfError::Unsupported { feature }) => {
                debug!(kind, line = start_line, "{feature}");
                self.reader.audit.note_unsupported(kind);
                self.skip_entity_body()?;
                Ok(Vec::new())
            }
            Err(DxfError::Invalid { message }) if self.mode == ReadMode::Recover => {
                warn!(kind, line = start_line, error = %message, "丢弃损坏的实体");
                self.reader
                    .audit
                    .record(start_line, format!("已丢弃 {kind}：{message}"));
                self.skip_entity_body()?;
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    fn parse_entity(&mut self, kind: &str) -> Result<Vec<Entity>, DxfError> {
        match kind {
            "LINE" => self.parse_line(),
            "CIRCLE" => self.parse_circle(),
            "ARC" => self.parse_arc(),
            "ELLIPSE" => self.parse_ellipse(),
            "LWPOLYLINE" => self.parse_lwpolyline(),
            "POLYLINE" => self.parse_polyline(),
            "SPLINE" => self.parse_spline(),
            "TEXT" => self.parse_text(),
            "MTEXT" => self.parse_mtext(),
            "POINT" => self.parse_point(),
            "INSERT" => self.parse_insert(),
            "SEQEND" => {
                self.skip_entity_body()?;
                Ok(Vec::new())
            }
            other => Err(DxfError::unsupported(format!("暂不支持的实体类型 {other}"))),
        }
    }

    /// 读取实体体直到下一个组码 0；通用字段先由 `CommonFields` 处理。
    fn read_body<F>(&mut self, kind: &str, common: &mut CommonFields, mut on_field: F) -> Result<(), DxfError>
    where
        F: FnMut(i32, &str) -> Result<(), DxfError>,
    {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    return Ok(());
                }
                Some((code, value)) => {
                    if !common.accept(code, &value, kind)? {
                        on_field(code, &value)?;
                    }
                }
                None => {
                    self.recoverable(format!("{kind} 未正确结束，文件提前截断"))?;
                    return Ok(());
                }
            }
        }
    }

    fn parse_line(&mut self) -> Result<Vec<Entity>, DxfError> {
        let mut common = CommonFields::default();
        let (mut start_x, mut start_y, mut end_x, mut end_y) = (None, None, None, None);
        self.read_body("LINE", &mut common, |code, value| match code {
            10 => assign_coord(&mut start_x, value, "LINE 起点 X（组码 10）"),
            20 => assign_coord(&mut start_y, value, "LINE 起点 Y（组码 20）"),
            11 => assign_coord(&mut end_x, value, "LINE 终点 X（组码 11）"),
            21 => assign_coord(&mut end_y, value, "LINE 终点 Y（组码 21）"),
            _ => Ok(()),
        })?;

        let sx = required(start_x, "LINE 缺少起点 X（组码 10）")?;
        let sy = required(start_y, "LINE 缺少起点 Y（组码 20）")?;
        let ex = required(end_x, "LINE 缺少终点 X（组码 11）")?;
        let ey = required(end_y, "LINE 缺少终点 Y（组码 21）")?;

        let line = Entity::Line(Line {
            start: Point2::new(sx, sy),
            end: Point2::new(ex, ey),
            layer: common.layer(),
            color: common.color(),
        });
        Ok(common.finish(line, false))
    }

    fn parse_circle(&mut self) -> Result<Vec<Entity>, DxfError> {
        let mut common = CommonFields::default();
        let (mut center_x, mut center_y, mut radius) = (None, None, None);
        self.read_body("CIRCLE", &mut common, |code, value| match code {
            10 => assign_coord(&mut center_x, value, "CIRCLE 圆心 X（组码 10）"),
            20 => assign_coord(&mut center_y, value, "CIRCLE 圆心 Y（组码 20）"),
            40 => assign_coord(&mut radius, value, "CIRCLE 半径（组码 40）"),
            _ => Ok(()),
        })?;

        let cx = required(center_x, "CIRCLE 缺少圆心 X（组码 10）")?;
        let cy = required(center_y, "CIRCLE 缺少圆心 Y（组码 20）")?;
        let radius = required(radius, "CIRCLE 缺少半径（组码 40）")?;
        if radius < 0.0 {
            return Err(DxfError::invalid(format!("CIRCLE 半径为负数：{radius}")));
        }

        let circle = Entity::Circle(Circle {
            center: Point2::new(cx, cy),
            radius,
            layer: common.layer(),
            color: common.color(),
        });
        Ok(common.finish(circle, true))
    }

    fn parse_arc(&mut self) -> Result<Vec<Entity>, DxfError> {
        let mut common = CommonFields::default();
        let (mut center_x, mut center_y, mut radius) = (None, None, None);
        let (mut start_angle, mut end_angle) = (None, None);
        self.read_body("ARC", &mut common, |code, value| match code {
            10 => assign_coord(&mut center_x, value, "ARC 圆心 X（组码 10）"),
            20 => assign_coord(&mut center_y, value, "ARC 圆心 Y（组码 20）"),
            40 => assign_coord(&mut radius, value, "ARC 半径（组码 40）"),
            50 => assign_coord(&mut start_angle, value, "ARC 起始角（组码 50）"),
            51 => assign_coord(&mut end_angle, value, "ARC 终止角（组码 51）"),
            _ => Ok(()),
        })?;

        let cx = required(center_x, "ARC 缺少圆心 X（组码 10）")?;
        let cy = required(center_y, "ARC 缺少圆心 Y（组码 20）")?;
        let radius = required(radius, "ARC 缺少半径（组码 40）")?;
        let start_angle = required(start_angle, "ARC 缺少起始角（组码 50）")?;
        let end_angle = required(end_angle, "ARC 缺少终止角（组码 51）")?;

        let arc = Entity::Arc(Arc {
            center: Point2::new(cx, cy),
            radius,
            start_angle: start_angle.to_radians(),
            end_angle: end_angle.to_radians(),
            layer: common.layer(),
            color: common.color(),
        });
        Ok(common.finish(arc, true))
    }

    fn parse_ellipse(&mut self) -> Result<Vec<Entity>, DxfError> {
        let mut common = CommonFields::default();
        let (mut center_x, mut center_y) = (None, None);
        let (mut major_x, mut major_y) = (None, None);
        let mut ratio = None;
        let mut start_parameter = 0.0;
        let mut end_parameter = std::f64::consts::TAU;
        self.read_body("ELLIPSE", &mut common, |code, value| {
            match code {
                10 => assign_coord(&mut center_x, value, "ELLIPSE 圆心 X（组码 10）")?,
                20 => assign_coord(&mut center_y, value, "ELLIPSE 圆心 Y（组码 20）")?,
                11 => assign_coord(&mut major_x, value, "ELLIPSE 主轴向量 X（组码 11）")?,
                21 => assign_coord(&mut major_y, value, "ELLIPSE 主轴向量 Y（组码 21）")?,
                40 => assign_coord(&mut ratio, value, "ELLIPSE 半径比（组码 40）")?,
                41 => start_parameter = parse_f64(value, "ELLIPSE 起始参数（组码 41）")?,
                42 => end_parameter = parse_f64(value, "ELLIPSE 终止参数（组码 42）")?,
                _ => {}
            }
            Ok(())
        })?;

        let cx = required(center_x, "ELLIPSE 缺少圆心 X（组码 10）")?;
        let cy = required(center_y, "ELLIPSE 缺少圆心 Y（组码 20）")?;
        let major_x = required(major_x, "ELLIPSE 缺少主轴向量 X（组码 11）")?;
        let major_y = required(major_y, "ELLIPSE 缺少主轴向量 Y（组码 21）")?;
        if major_x.abs() < f64::EPSILON && major_y.abs() < f64::EPSILON {
            return Err(DxfError::invalid("ELLIPSE 主轴向量长度为 0，无法创建实体"));
        }
        let ratio = ratio.unwrap_or(1.0);
        if ratio <= 0.0 {
            return Err(DxfError::invalid(format!(
                "ELLIPSE 半径比必须为正数，实际为 {ratio}"
            )));
        }

        let ellipse = Entity::Ellipse(Ellipse {
            center: Point2::new(cx, cy),
            major_axis: Vector2::new(major_x, major_y),
            ratio,
            start_parameter,
            end_parameter,
            layer: common.layer(),
            color: common.color(),
        });
        Ok(common.finish(ellipse, false))
    }

    fn parse_lwpolyline(&mut self) -> Result<Vec<Entity>, DxfError> {
        let mut common = CommonFields::default();
        let mut is_closed = false;
        let mut vertices: Vec<PolylineVertex> = Vec::new();
        let mut pending_x: Option<f64> = None;
        let mut pending_y: Option<f64> = None;
        self.read_body("LWPOLYLINE", &mut common, |code, value| {
            match code {
                70 => {
                    let flag = parse_i32(value, "LWPOLYLINE 标志（组码 70）")?;
                    is_closed = flag & 0x01 == 0x01;
                }
                10 => {
                    let x = parse_f64(value, "LWPOLYLINE 顶点 X")?;
                    match pending_y.take() {
                        Some(y) => vertices.push(PolylineVertex::new(Point2::new(x, y))),
                        None => {
                            if pending_x.replace(x).is_some() {
                                return Err(DxfError::invalid(
                                    "LWPOLYLINE 顶点缺少对应的 Y（组码 20）",
                                ));
                            }
                        }
                    }
                }
                20 => {
                    let y = parse_f64(value, "LWPOLYLINE 顶点 Y")?;
                    match pending_x.take() {
                        Some(x) => vertices.push(PolylineVertex::new(Point2::new(x, y))),
                        None => {
                            if pending_y.replace(y).is_some() {
                                return Err(DxfError::invalid(
                                    "LWPOLYLINE 顶点缺少对应的 X（组码 10）",
                                ));
                            }
                        }
                    }
                }
                42 => {
                    let bulge = parse_f64(value, "LWPOLYLINE 顶点 bulge")?;
                    match vertices.last_mut() {
                        Some(vertex) => vertex.bulge = bulge,
                        None => {
                            return Err(DxfError::invalid(
                                "LWPOLYLINE 在定义首个顶点前遇到 bulge（组码 42）",
                            ));
                        }
                    }
                }
                _ => {}
            }
            Ok(())
        })?;

        if pending_x.is_some() || pending_y.is_some() {
            return Err(DxfError::invalid(
                "LWPOLYLINE 顶点坐标应成对出现（组码 10/20），检测到不完整的顶点",
            ));
        }
        if vertices.is_empty() {
            return Err(DxfError::invalid("LWPOLYLINE 未解析到任何顶点"));
        }

        let polyline = Entity::Polyline(Polyline {
            vertices,
            is_closed,
            layer: common.layer(),
            color: common.color(),
        });
        Ok(common.finish(polyline, true))
    }

    /// 旧式 POLYLINE：头记录后跟随 VERTEX 序列，以 SEQEND 结束。仅支持二维/三维折线。
    fn parse_polyline(&mut self) -> Result<Vec<Entity>, DxfError> {
        let mut common = CommonFields::default();
        let mut flags: i32 = 0;
        self.read_body("POLYLINE", &mut common, |code, value| {
            if code == 70 {
                flags = parse_i32(value, "POLYLINE 标志（组码 70）")?;
            }
            Ok(())
        })?;

        let mut vertices: Vec<PolylineVertex> = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "VERTEX" => {
                        if let Some(vertex) = self.parse_vertex()? {
                            vertices.push(vertex);
                        }
                    }
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        self.recoverable("POLYLINE 缺少 SEQEND 终止标记")?;
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some((code, _)) => {
                    return Err(DxfError::invalid(format!(
                        "POLYLINE 顶点序列遇到组码 {code}（期望 0）"
                    )));
                }
                None => return Err(DxfError::invalid("POLYLINE 未正确结束")),
            }
        }

        if flags & (0x10 | 0x40) != 0 {
            return Err(DxfError::unsupported("POLYLINE 网格/多面网格暂不支持"));
        }
        if vertices.is_empty() {
            return Err(DxfError::invalid("POLYLINE 未解析到任何顶点"));
        }

        let polyline = Entity::Polyline(Polyline {
            vertices,
            is_closed: flags & 0x01 != 0,
            layer: common.layer(),
            color: common.color(),
        });
        // 三维多段线使用 WCS 坐标
        let uses_ocs = flags & 0x08 == 0;
        Ok(common.finish(polyline, uses_ocs))
    }

    /// 样条拟合生成的控制框架顶点（标志 16）不参与绘制，返回 `None`。
    fn parse_vertex(&mut self) -> Result<Option<PolylineVertex>, DxfError> {
        let mut common = CommonFields::default();
        let (mut x, mut y) = (None, None);
        let mut bulge = 0.0;
        let mut flags = 0;
        self.read_body("VERTEX", &mut common, |code, value| {
            match code {
                10 => assign_coord(&mut x, value, "VERTEX X（组码 10）")?,
                20 => assign_coord(&mut y, value, "VERTEX Y（组码 20）")?,
                42 => bulge = parse_f64(value, "VERTEX bulge（组码 42）")?,
                70 => flags = parse_i32(value, "VERTEX 标志（组码 70）")?,
                _ => {}
            }
            Ok(())
        })?;

        if flags & 0x10 != 0 {
            return Ok(None);
        }
        let x = required(x, "VERTEX 缺少 X（组码 10）")?;
        let y = required(y, "VERTEX 缺少 Y（组码 20）")?;
        Ok(Some(PolylineVertex::with_bulge(Point2::new(x, y), bulge)))
    }

    fn parse_spline(&mut self) -> Result<Vec<Entity>, DxfError> {
        let mut common = CommonFields::default();
        let mut flags: i32 = 0;
        let mut degree: Option<i32> = None;
        let mut knot_values: Vec<f64> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        let mut control_points: Vec<Point2> = Vec::new();
        let mut fit_points: Vec<Point2> = Vec::new();
        let mut pending_control_x: Option<f64> = None;
        let mut pending_fit_x: Option<f64> = None;
        self.read_body("SPLINE", &mut common, |code, value| {
            match code {
                70 => flags = parse_i32(value, "SPLINE 类型标志（组码 70）")?,
                71 => degree = Some(parse_i32(value, "SPLINE 阶数（组码 71）")?),
                40 => knot_values.push(parse_f64(value, "SPLINE 节点值（组码 40）")?),
                41 => weights.push(parse_f64(value, "SPLINE 权重（组码 41）")?),
                10 => {
                    let x = parse_f64(value, "SPLINE 控制点 X（组码 10）")?;
                    if pending_control_x.replace(x).is_some() {
                        return Err(DxfError::invalid("SPLINE 控制点缺少 Y（组码 20）"));
                    }
                }
                20 => {
                    let y = parse_f64(value, "SPLINE 控制点 Y（组码 20）")?;
                    let x = pending_control_x
                        .take()
                        .ok_or_else(|| DxfError::invalid("SPLINE 控制点缺少 X（组码 10）"))?;
                    control_points.push(Point2::new(x, y));
                }
                11 => {
                    let x = parse_f64(value, "SPLINE 拟合点 X（组码 11）")?;
                    if pending_fit_x.replace(x).is_some() {
                        return Err(DxfError::invalid("SPLINE 拟合点缺少 Y（组码 21）"));
                    }
                }
                21 => {
                    let y = parse_f64(value, "SPLINE 拟合点 Y（组码 21）")?;
                    let x = pending_fit_x
                        .take()
                        .ok_or_else(|| DxfError::invalid("SPLINE 拟合点缺少 X（组码 11）"))?;
                    fit_points.push(Point2::new(x, y));
                }
                _ => {}
            }
            Ok(())
        })?;

        if control_points.is_empty() && fit_points.is_empty() {
            return Err(DxfError::invalid("SPLINE 既没有控制点也没有拟合点"));
        }

        let spline = Entity::Spline(Spline {
            degree: degree.unwrap_or(3),
            is_closed: flags & 0x01 != 0,
            control_points,
            fit_points,
            knot_values,
            weights,
            layer: common.layer(),
            color: common.color(),
        });
        Ok(common.finish(spline, false))
    }

    fn parse_text(&mut self) -> Result<Vec<Entity>, DxfError> {
        let mut common = CommonFields::default();
        let fields = self.read_text_fields("TEXT", &mut common)?;
        let text = fields.into_text(&common)?;
        Ok(common.finish(Entity::Text(text), true))
    }

    /// TEXT 与 ATTRIB 共用的字段读取。
    fn read_text_fields(&mut self, kind: &str, common: &mut CommonFields) -> Result<TextFields, DxfError> {
        let mut fields = TextFields::new(kind);
        self.read_body(kind, common, |code, value| {
            match code {
                10 => assign_coord(&mut fields.insert_x, value, "文字插入点 X（组码 10）")?,
                20 => assign_coord(&mut fields.insert_y, value, "文字插入点 Y（组码 20）")?,
                11 => fields.align_x = Some(parse_f64(value, "文字对齐点 X（组码 11）")?),
                21 => fields.align_y = Some(parse_f64(value, "文字对齐点 Y（组码 21）")?),
                40 => assign_coord(&mut fields.height, value, "文字高度（组码 40）")?,
                50 => fields.rotation_deg = parse_f64(value, "文字旋转角（组码 50）")?,
                72 => fields.horizontal_align = parse_i16(value, "文字水平对齐（组码 72）")?,
                73 | 74 => fields.vertical_align = parse_i16(value, "文字垂直对齐")?,
                70 => fields.flags = parse_i32(value, "属性标志（组码 70）")?,
                1 => fields.content = Some(decode_inline_text(value)),
                _ => {}
            }
            Ok(())
        })?;
        Ok(fields)
    }

    fn parse_mtext(&mut self) -> Result<Vec<Entity>, DxfError> {
        let mut common = CommonFields::default();
        let (mut insert_x, mut insert_y, mut height) = (None, None, None);
        let mut reference_width = None;
        let mut attachment_point: i16 = 1;
        let mut rotation_deg = 0.0;
        let (mut direction_x, mut direction_y) = (None, None);
        let mut chunks = String::new();
        let mut tail: Option<String> = None;
        self.read_body("MTEXT", &mut common, |code, value| {
            match code {
                10 => assign_coord(&mut insert_x, value, "MTEXT 插入点 X（组码 10）")?,
                20 => assign_coord(&mut insert_y, value, "MTEXT 插入点 Y（组码 20）")?,
                40 => assign_coord(&mut height, value, "MTEXT 高度（组码 40）")?,
                41 => reference_width = Some(parse_f64(value, "MTEXT 参考宽度（组码 41）")?),
                71 => attachment_point = parse_i16(value, "MTEXT 附着点（组码 71）")?,
                50 => rotation_deg = parse_f64(value, "MTEXT 旋转角（组码 50）")?,
                11 => direction_x = Some(parse_f64(value, "MTEXT 方向 X（组码 11）")?),
                21 => direction_y = Some(parse_f64(value, "MTEXT 方向 Y（组码 21）")?),
                3 => chunks.push_str(value),
                1 => tail = Some(value.to_string()),
                _ => {}
            }
            Ok(())
        })?;

        let ix = required(insert_x, "MTEXT 缺少插入点 X（组码 10）")?;
        let iy = required(insert_y, "MTEXT 缺少插入点 Y（组码 20）")?;
        let height = required(height, "MTEXT 缺少文字高度（组码 40）")?;
        let tail = tail.ok_or_else(|| DxfError::invalid("MTEXT 缺少文本内容（组码 1）"))?;
        chunks.push_str(&tail);

        let rotation = match (direction_x, direction_y) {
            (Some(x), Some(y)) if x.abs() > f64::EPSILON || y.abs() > f64::EPSILON => y.atan2(x),
            _ => rotation_deg.to_radians(),
        };

        let mtext = Entity::MText(MText {
            insert: Point2::new(ix, iy),
            content: decode_mtext_content(&chunks),
            height,
            rotation,
            reference_width,
            attachment_point,
            layer: common.layer(),
            color: common.color(),
        });
        Ok(common.finish(mtext, false))
    }

    fn parse_point(&mut self) -> Result<Vec<Entity>, DxfError> {
        let mut common = CommonFields::default();
        let (mut x, mut y) = (None, None);
        self.read_body("POINT", &mut common, |code, value| match code {
            10 => assign_coord(&mut x, value, "POINT X（组码 10）"),
            20 => assign_coord(&mut y, value, "POINT Y（组码 20）"),
            _ => Ok(()),
        })?;
        let x = required(x, "POINT 缺少 X（组码 10）")?;
        let y = required(y, "POINT 缺少 Y（组码 20）")?;
        let point = Entity::Point(PointEntity {
            location: Point2::new(x, y),
            layer: common.layer(),
            color: common.color(),
        });
        Ok(common.finish(point, false))
    }

    fn parse_insert(&mut self) -> Result<Vec<Entity>, DxfError> {
        let mut common = CommonFields::default();
        let mut name: Option<String> = None;
        let (mut insert_x, mut insert_y) = (None, None);
        let (mut scale_x, mut scale_y): (Option<f64>, Option<f64>) = (None, None);
        let mut rotation_deg: f64 = 0.0;
        self.read_body("INSERT", &mut common, |code, value| {
            match code {
                2 => {
                    if name.is_some() {
                        return Err(DxfError::invalid("INSERT 遇到重复的块名（组码 2）"));
                    }
                    name = Some(value.trim().to_string());
                }
                10 => assign_coord(&mut insert_x, value, "INSERT 插入点 X（组码 10）")?,
                20 => assign_coord(&mut insert_y, value, "INSERT 插入点 Y（组码 20）")?,
                41 => scale_x = Some(parse_f64(value, "INSERT 缩放 X（组码 41）")?),
                42 => scale_y = Some(parse_f64(value, "INSERT 缩放 Y（组码 42）")?),
                50 => rotation_deg = parse_f64(value, "INSERT 旋转角（组码 50）")?,
                _ => {}
            }
            Ok(())
        })?;

        let name = name.ok_or_else(|| DxfError::invalid("INSERT 缺少块名（组码 2）"))?;
        let ix = required(insert_x, "INSERT 缺少插入点 X（组码 10）")?;
        let iy = required(insert_y, "INSERT 缺少插入点 Y（组码 20）")?;
        let sx = scale_x.unwrap_or(1.0);
        let sy = scale_y.unwrap_or(sx);

        let mut entities = common.finish(
            Entity::BlockReference(BlockReference {
                name,
                insert: Point2::new(ix, iy),
                scale: Vector2::new(sx, sy),
                rotation: rotation_deg.to_radians(),
                layer: common.layer(),
                color: common.color(),
            }),
            false,
        );

        // 属性以 ATTRIB 记录跟随，直到 SEQEND；属性坐标已在 WCS 中
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "ATTRIB" => {
                        let mut attrib_common = CommonFields::default();
                        let fields = self.read_text_fields("ATTRIB", &mut attrib_common)?;
                        if fields.flags & 0x01 != 0 {
                            continue;
                        }
                        let text = fields.into_text(&attrib_common)?;
                        entities.extend(attrib_common.finish(Entity::Text(text), true));
                    }
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some((code, value)) => {
                    return Err(DxfError::invalid(format!(
                        "INSERT 属性段出现意外组码 {code} 值 {value}"
                    )));
                }
                None => break,
            }
        }

        Ok(entities)
    }

    fn skip_entity_body(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        Ok(())
    }
}

struct TextFields {
    kind: String,
    insert_x: Option<f64>,
    insert_y: Option<f64>,
    align_x: Option<f64>,
    align_y: Option<f64>,
    height: Option<f64>,
    rotation_deg: f64,
    horizontal_align: i16,
    vertical_align: i16,
    flags: i32,
    content: Option<String>,
}

impl TextFields {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            insert_x: None,
            insert_y: None,
            align_x: None,
            align_y: None,
            height: None,
            rotation_deg: 0.0,
            horizontal_align: 0,
            vertical_align: 0,
            flags: 0,
            content: None,
        }
    }

    /// 对齐方式非默认时，文字定位以第二对齐点（组码 11/21）为准。
    fn into_text(self, common: &CommonFields) -> Result<Text, DxfError> {
        let kind = &self.kind;
        let ix = required(self.insert_x, &format!("{kind} 缺少插入点 X（组码 10）"))?;
        let iy = required(self.insert_y, &format!("{kind} 缺少插入点 Y（组码 20）"))?;
        let height = required(self.height, &format!("{kind} 缺少文字高度（组码 40）"))?;
        let content = self
            .content
            .ok_or_else(|| DxfError::invalid(format!("{kind} 缺少文本内容（组码 1）")))?;

        let aligned = self.horizontal_align != 0 || self.vertical_align != 0;
        let insert = match (aligned, self.align_x, self.align_y) {
            (true, Some(x), Some(y)) => Point2::new(x, y),
            _ => Point2::new(ix, iy),
        };
        let horizontal_align = match self.horizontal_align {
            // 3 对齐、4 中间、5 布满 按居中处理
            1 | 3 | 4 | 5 => 1,
            2 => 2,
            _ => 0,
        };

        Ok(Text {
            insert,
            content,
            height,
            rotation: self.rotation_deg.to_radians(),
            horizontal_align,
            layer: common.layer(),
            color: common.color(),
        })
    }
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<(i32, String)>,
    line_number: usize,
    mode: ReadMode,
    audit: AuditReport,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str, mode: ReadMode) -> Self {
        Self {
            lines: source.lines(),
            buffer: None,
            line_number: 0,
            mode,
            audit: AuditReport::default(),
        }
    }

    fn next_line(&mut self) -> Option<&'a str> {
        let line = self.lines.next()?;
        self.line_number += 1;
        Some(line)
    }

    /// 读取下一个组码-值对。恢复模式下跳过无法解析的组码行以重新同步。
    fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        loop {
            let Some(code_line) = self.next_line() else {
                return Ok(None);
            };

            let code = match code_line.trim().parse::<i32>() {
                Ok(code) => code,
                Err(_) => {
                    let message = format!(
                        "第 {} 行的组码 \"{}\" 无法解析为整数",
                        self.line_number,
                        code_line.trim()
                    );
                    if self.mode == ReadMode::Strict {
                        return Err(DxfError::invalid(message));
                    }
                    debug!(line = self.line_number, "跳过无法解析的组码行");
                    self.audit
                        .record(self.line_number, format!("{message}，已跳过该行"));
                    continue;
                }
            };

            let Some(value_line) = self.next_line() else {
                let message = format!(
                    "文件在第 {} 行结束，缺少与组码对应的值行",
                    self.line_number
                );
                if self.mode == ReadMode::Strict {
                    return Err(DxfError::invalid(message));
                }
                self.audit.record(self.line_number, message);
                return Ok(None);
            };

            let value = value_line.trim_end_matches('\r').to_string();
            return Ok(Some((code, value)));
        }
    }

    fn put_back(&mut self, pair: (i32, String)) {
        debug_assert!(self.buffer.is_none(), "尝试多次回退 DXF pair");
        self.buffer = Some(pair);
    }
}

fn required(value: Option<f64>, message: &str) -> Result<f64, DxfError> {
    value.ok_or_else(|| DxfError::invalid(message))
}

fn assign_coord(slot: &mut Option<f64>, raw: &str, context: &str) -> Result<(), DxfError> {
    if slot.is_some() {
        return Err(DxfError::invalid(format!("{context} 出现重复值")));
    }
    *slot = Some(parse_f64(raw, context)?);
    Ok(())
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DxfError::invalid(format!("{context} 不是有限数值（值：\"{raw}\"）")))
    }
}

fn parse_i32(raw: &str, context: &str) -> Result<i32, DxfError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i16(raw: &str, context: &str) -> Result<i16, DxfError> {
    let value = parse_i32(raw, context)?;
    i16::try_from(value)
        .map_err(|_| DxfError::invalid(format!("{context} 超出 i16 范围（值：{value}）")))
}

/// 解码 MTEXT 内联格式：`\P` 换行、`\~` 不换行空格，
/// 去除 `{}` 分组与 `\f…;`、`\H…;` 等带参数的格式码。
fn decode_mtext_content(raw: &str) -> String {
    let mut result = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('P') | Some('n') => result.push('\n'),
                Some('~') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some('{') => result.push('{'),
                Some('}') => result.push('}'),
                Some('L') | Some('l') | Some('O') | Some('o') | Some('K') | Some('k') => {}
                Some('A') | Some('C') | Some('c') | Some('F') | Some('f') | Some('H')
                | Some('h') | Some('Q') | Some('q') | Some('T') | Some('t') | Some('W')
                | Some('w') | Some('p') => {
                    for next in chars.by_ref() {
                        if next == ';' {
                            break;
                        }
                    }
                }
                Some('S') | Some('s') => {
                    // 堆叠分数 \Snum^den; 以 "num/den" 输出
                    for next in chars.by_ref() {
                        match next {
                            ';' => break,
                            '^' | '#' => result.push('/'),
                            other => result.push(other),
                        }
                    }
                }
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            },
            '{' | '}' => {}
            _ => result.push(ch),
        }
    }
    result
}

/// TEXT/ATTRIB 中的控制码：`%%d` 度、`%%p` 正负、`%%c` 直径，`%%u`/`%%o` 下划线开关去除。
fn decode_inline_text(raw: &str) -> String {
    let mut result = String::new();
    let mut rest = raw;
    while let Some(index) = rest.find("%%") {
        result.push_str(&rest[..index]);
        let after = &rest[index + 2..];
        let mut chars = after.chars();
        match chars.next() {
            Some('d') | Some('D') => result.push('°'),
            Some('p') | Some('P') => result.push('±'),
            Some('c') | Some('C') => result.push('⌀'),
            Some('%') => result.push('%'),
            Some('u') | Some('U') | Some('o') | Some('O') => {}
            Some(other) => {
                result.push_str("%%");
                result.push(other);
            }
            None => {
                result.push_str("%%");
            }
        }
        rest = chars.as_str();
    }
    result.push_str(rest);
    result
}
