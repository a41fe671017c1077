use crate::{
    block::BlockKind,
    config::EditorConfig,
    drop::DropKind,
    gesture::GestureOutcome,
    schema::ValueKind,
    session::{AutoConfirm, MemoryEngine, ResultUsage, RunMode, Session},
    storage::ReceipeStore,
    tree::Tree,
    validation::{ValidatedTree, ValidationSeverity},
    view::Shape,
};
use anyhow::Result;
use egui::{pos2, vec2, Align2, Color32, FontId, Pos2, Rect, Sense, Stroke};
use serde_json::Map;
use std::collections::HashMap;
use std::time::Instant;
use ulid::Ulid;

const ROW_HEIGHT: f32 = 36.0;
const HEADER_HEIGHT: f32 = 22.0;
const PADDING: f32 = 6.0;
const TRASH_SIZE: f32 = 72.0;

/// Main application state
pub struct ReceipeEditorApp {
    session: Session,

    /// Stand-in for the remote execution engine
    engine: MemoryEngine,

    config: EditorConfig,

    /// Block shown in the property panel
    selected_block: Option<Ulid>,

    ui_state: UiState,

    status_message: String,

    /// Validation issues per block
    validation_issues: HashMap<Ulid, ValidationSeverity>,

    show_validation_panel: bool,

    /// Last run result, pretty printed
    last_result: Option<String>,
}

struct UiState {
    /// Candidate the pointer is over during a drag
    hover_target: Option<Ulid>,

    /// Drag was started by files hovering the window
    file_drag: bool,

    /// Block whose fields are loaded in `edit_buffers`
    edit_target: Option<Ulid>,

    edit_buffers: HashMap<String, String>,

    /// Spec typed for the next split branch
    branch_spec: String,

    run_mode: RunMode,

    /// Ask before replacing a receipe that has blocks
    confirm_overwrites: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            hover_target: None,
            file_drag: false,
            edit_target: None,
            edit_buffers: HashMap::new(),
            branch_spec: String::new(),
            run_mode: RunMode::Preview,
            confirm_overwrites: true,
        }
    }
}

/// Screen placement of one block for this frame
#[derive(Debug, Clone, Copy)]
struct Placed {
    id: Ulid,
    rect: Rect,
    depth: usize,
}

impl ReceipeEditorApp {
    pub fn new(config: EditorConfig) -> Result<Self> {
        let registry = config.build_registry();
        let mut session = Session::new(registry, config.press_hold())?;
        session.reset(&mut AutoConfirm(true))?;

        Ok(Self {
            session,
            engine: MemoryEngine::new(),
            config,
            selected_block: None,
            ui_state: UiState::default(),
            status_message: "Drag blocks from the palette into the receipe".to_string(),
            validation_issues: HashMap::new(),
            show_validation_panel: true,
            last_result: None,
        })
    }

    fn prompt(&self) -> AutoConfirm {
        // without a modal dialog the checkbox stands in for the answer
        AutoConfirm(!self.ui_state.confirm_overwrites)
    }

    fn report<T>(&mut self, action: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("{} failed: {:#}", action, e);
                self.status_message = format!("❌ {} failed: {}", action, e);
                None
            }
        }
    }

    fn after_replace(&mut self, replaced: bool, what: &str) {
        if replaced {
            self.selected_block = None;
            self.ui_state.edit_target = None;
            self.status_message = format!("✓ {}", what);
        } else {
            self.status_message =
                "⚠ Receipe has blocks; untick 'Confirm overwrites' to replace it".to_string();
        }
    }

    // ========== Session Actions ==========

    fn pull(&mut self) {
        let mut prompt = self.prompt();
        let result = self.session.pull(&mut self.engine, &mut prompt);
        if let Some(replaced) = self.report("Pull", result) {
            self.after_replace(replaced, "Pulled receipe from engine");
        }
    }

    fn push(&mut self) {
        let result = self.session.push(&mut self.engine);
        if self.report("Push", result).is_some() {
            self.status_message = "✓ Receipe sent to engine".to_string();
        }
    }

    fn reset(&mut self) {
        let mut prompt = self.prompt();
        let result = self.session.reset(&mut prompt);
        if let Some(replaced) = self.report("Reset", result) {
            self.after_replace(replaced, "Started a new receipe");
        }
    }

    fn run(&mut self) {
        let upto = self
            .selected_block
            .and_then(|id| self.session.tree().get(id))
            .map(|b| b.name.clone());
        let mode = self.ui_state.run_mode.to_string();
        // running always syncs; the engine is local
        let result = self.session.run(
            &mut self.engine,
            &mut AutoConfirm(true),
            &mode,
            upto.as_deref(),
            ResultUsage::Table,
        );
        if let Some(value) = self.report("Run", result) {
            self.last_result = serde_json::to_string_pretty(&value).ok();
            self.status_message = format!("✓ Ran in {} mode", mode);
        }
    }

    fn save(&mut self) {
        let result = ReceipeStore::create(&self.config.storage_dir).and_then(|store| {
            let path = store.save(self.session.tree())?;
            store.append_events(self.session.tree().events())?;
            Ok(path)
        });
        if let Some(path) = self.report("Save", result) {
            self.session.tree_mut().clear_events();
            self.status_message = format!("✓ Saved to {}", path.display());
        }
    }

    fn open(&mut self, name: &str) {
        let result = ReceipeStore::open(&self.config.storage_dir)
            .and_then(|store| store.load(self.session.registry(), name));
        let Some(tree) = self.report("Open", result) else {
            return;
        };
        let mut prompt = self.prompt();
        let result = self.session.replace(tree, &mut prompt);
        if let Some(replaced) = self.report("Open", result) {
            self.after_replace(replaced, &format!("Opened '{}'", name));
        }
    }

    fn stored_receipes(&self) -> Vec<String> {
        ReceipeStore::open(&self.config.storage_dir)
            .and_then(|store| store.list())
            .unwrap_or_default()
    }

    // ========== Rendering ==========

    fn render_ui(&mut self, ctx: &egui::Context) {
        if self.show_validation_panel {
            let result = self.session.tree().validate();
            self.validation_issues = self.session.tree().blocks_with_issues(&result);
        }

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("Receipe", |ui| {
                    if ui.button("New").clicked() {
                        self.reset();
                        ui.close_menu();
                    }
                    ui.menu_button("Open", |ui| {
                        let names = self.stored_receipes();
                        if names.is_empty() {
                            ui.label("(nothing saved)");
                        }
                        for name in names {
                            if ui.button(&name).clicked() {
                                self.open(&name);
                                ui.close_menu();
                            }
                        }
                    });
                    if ui.button("Save").clicked() {
                        self.save();
                        ui.close_menu();
                    }
                    ui.separator();
                    ui.checkbox(&mut self.ui_state.confirm_overwrites, "Confirm overwrites");
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });

                ui.menu_button("View", |ui| {
                    ui.checkbox(&mut self.show_validation_panel, "Show Validation Panel");
                });
            });
        });

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("⬇ Pull").clicked() {
                    self.pull();
                }
                if ui.button("⬆ Push").clicked() {
                    self.push();
                }
                ui.separator();

                egui::ComboBox::from_label("Mode")
                    .selected_text(self.ui_state.run_mode.to_string())
                    .show_ui(ui, |ui| {
                        for mode in [
                            RunMode::Preview,
                            RunMode::Train,
                            RunMode::Test,
                            RunMode::Run,
                            RunMode::Columns,
                        ] {
                            ui.selectable_value(&mut self.ui_state.run_mode, mode, mode.to_string());
                        }
                    });
                if ui.button("▶ Run").clicked() {
                    self.run();
                }
                ui.separator();

                ui.label(format!("Blocks: {}", self.session.tree().walk().len()));
                if self.session.is_dirty() {
                    ui.colored_label(Color32::from_rgb(255, 165, 0), "● not synced");
                }
            });
        });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(&self.status_message);
            });
        });

        if self.show_validation_panel {
            egui::TopBottomPanel::bottom("validation_panel")
                .default_height(160.0)
                .show(ctx, |ui| {
                    self.render_validation_panel(ui);
                });
        }

        egui::SidePanel::left("palette_panel")
            .default_width(220.0)
            .show(ctx, |ui| {
                self.render_palette(ui);
            });

        egui::SidePanel::right("properties_panel")
            .default_width(300.0)
            .show(ctx, |ui| {
                self.render_properties_panel(ui);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_receipe(ui);
        });
    }

    fn render_palette(&mut self, ui: &mut egui::Ui) {
        ui.heading("Blocks");
        ui.separator();

        let palette = self.session.registry().palette();
        egui::ScrollArea::vertical().show(ui, |ui| {
            let mut group = None;
            for entry in palette {
                if group.as_deref() != Some(entry.group.as_str()) {
                    ui.add_space(4.0);
                    let title = if entry.group.is_empty() {
                        "general"
                    } else {
                        entry.group.as_str()
                    };
                    ui.label(egui::RichText::new(title).strong());
                    group = Some(entry.group.clone());
                }

                let label = egui::Label::new(format!("  {}", entry.label))
                    .selectable(false)
                    .sense(Sense::drag());
                let response = ui.add(label);
                let response = match &entry.description {
                    Some(description) => response.on_hover_text(description),
                    None => response,
                };
                if response.drag_started() {
                    match self.session.drag_new_block(&entry.type_name) {
                        Ok(_) => self.status_message = format!("Dragging new {}", entry.label),
                        Err(e) => self.status_message = format!("❌ {}", e),
                    }
                }
            }
        });
    }

    fn render_properties_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Properties");
        ui.separator();

        let Some(id) = self.selected_block else {
            ui.label("No block selected");
            ui.separator();
            ui.label("Click a block to edit its properties");
            return;
        };
        let tree = self.session.tree();
        let (view, form) = match (tree.view(id), tree.edit_form(id)) {
            (Ok(view), Ok(form)) => (view, form),
            _ => {
                self.selected_block = None;
                return;
            }
        };

        ui.label(egui::RichText::new(&view.title).strong());
        if !view.description.is_empty() {
            ui.label(egui::RichText::new(&view.description).small());
        }
        ui.separator();

        if view.editable {
            if self.ui_state.edit_target != Some(id) {
                self.ui_state.edit_buffers = form
                    .iter()
                    .map(|field| (field.name.clone(), field.text()))
                    .collect();
                self.ui_state.edit_target = Some(id);
            }

            egui::Grid::new("property_grid")
                .num_columns(2)
                .striped(true)
                .show(ui, |ui| {
                    for field in &form {
                        ui.label(&field.label).on_hover_text(field.kind.to_string());
                        let buffer = self
                            .ui_state
                            .edit_buffers
                            .entry(field.name.clone())
                            .or_default();
                        if field.kind == ValueKind::Boolean {
                            let mut checked = buffer.eq_ignore_ascii_case("true");
                            if ui
                                .add_enabled(field.enabled, egui::Checkbox::without_text(&mut checked))
                                .changed()
                            {
                                *buffer = checked.to_string();
                            }
                        } else {
                            ui.add_enabled(field.enabled, egui::TextEdit::singleline(buffer));
                        }
                        ui.end_row();
                    }
                });

            if ui.button("Apply").clicked() {
                let values: Map<String, serde_json::Value> = form
                    .iter()
                    .filter(|field| field.enabled)
                    .filter_map(|field| {
                        self.ui_state
                            .edit_buffers
                            .get(&field.name)
                            .map(|text| (field.name.clone(), field.parse(text)))
                    })
                    .collect();
                let result = self.session.tree_mut().apply_properties(id, &values);
                if self.report("Apply", result.map_err(Into::into)).is_some() {
                    self.ui_state.edit_target = None;
                    self.status_message = "✓ Properties applied".to_string();
                }
            }
        } else {
            ui.label("Not editable");
        }

        if view.shape == Shape::Split {
            ui.separator();
            ui.label("New branch (comma separated):");
            ui.text_edit_singleline(&mut self.ui_state.branch_spec);
            if ui.button("Add branch").clicked() {
                let spec: Vec<String> = self
                    .ui_state
                    .branch_spec
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                let result = self.session.add_branch(id, spec);
                if self.report("Add branch", result.map_err(Into::into)).is_some() {
                    self.ui_state.branch_spec.clear();
                }
            }
        }

        if view.movable {
            ui.separator();
            if ui.button("🗑 Delete").clicked() {
                let result = self.session.tree_mut().delete(id);
                if let Some(count) = self.report("Delete", result.map_err(Into::into)) {
                    self.selected_block = None;
                    self.status_message = format!("✓ Deleted {} block(s)", count);
                }
            }
        }

        if let Some(result) = &self.last_result {
            ui.separator();
            ui.label("Last result:");
            egui::ScrollArea::vertical()
                .id_salt("last_result")
                .show(ui, |ui| {
                    ui.monospace(result);
                });
        }
    }

    fn render_validation_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Validation");
        ui.separator();

        let result = self.session.tree().validate();

        let error_count = result.errors().len();
        let warning_count = result.warnings().len();
        let info_count = result.info().len();

        ui.horizontal(|ui| {
            if error_count > 0 {
                ui.colored_label(Color32::RED, format!("❌ {} Errors", error_count));
            }
            if warning_count > 0 {
                ui.colored_label(
                    Color32::from_rgb(255, 165, 0),
                    format!("⚠ {} Warnings", warning_count),
                );
            }
            if info_count > 0 {
                ui.colored_label(Color32::BLUE, format!("ℹ {} Info", info_count));
            }
            if error_count == 0 && warning_count == 0 {
                ui.colored_label(Color32::GREEN, "✓ All checks passed");
            }
        });

        ui.separator();

        egui::ScrollArea::vertical().show(ui, |ui| {
            for issue in &result.issues {
                let icon = match issue.severity {
                    ValidationSeverity::Error => "❌",
                    ValidationSeverity::Warning => "⚠",
                    ValidationSeverity::Info => "ℹ",
                };
                ui.horizontal(|ui| {
                    ui.label(icon);
                    ui.label(&issue.message);
                    if let Some(&id) = issue.affected_blocks.first() {
                        if ui.small_button("Go to").clicked() {
                            self.selected_block = Some(id);
                        }
                    }
                });
            }
        });
    }

    /// Draw the receipe and drive the gesture machine from pointer input
    fn render_receipe(&mut self, ui: &mut egui::Ui) {
        let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::hover());
        let canvas_rect = response.rect;

        let placed = layout(self.session.tree(), canvas_rect);
        let trash_rect = Rect::from_min_size(
            canvas_rect.right_bottom() - vec2(TRASH_SIZE + PADDING, TRASH_SIZE + PADDING),
            vec2(TRASH_SIZE, TRASH_SIZE),
        );

        self.handle_pointer(ui.ctx(), canvas_rect, &placed, trash_rect);

        for block in &placed {
            self.draw_block(&painter, block);
        }
        self.draw_affordances(&painter, &placed, trash_rect);

        if self.session.drag().trash_visible() {
            let fill = if self.session.drag().trash_highlighted() {
                Color32::from_rgb(255, 200, 200)
            } else {
                Color32::from_rgb(235, 235, 235)
            };
            painter.rect(trash_rect, 8.0, fill, Stroke::new(2.0, Color32::DARK_RED));
            painter.text(
                trash_rect.center(),
                Align2::CENTER_CENTER,
                "🗑",
                FontId::proportional(28.0),
                Color32::DARK_RED,
            );
        }

        self.draw_proxy(ui.ctx());
    }

    fn handle_pointer(
        &mut self,
        ctx: &egui::Context,
        canvas_rect: Rect,
        placed: &[Placed],
        trash_rect: Rect,
    ) {
        let now = Instant::now();
        let (pointer, pressed, released, escape) = ctx.input(|i| {
            (
                i.pointer.latest_pos(),
                i.pointer.primary_pressed(),
                i.pointer.primary_released(),
                i.key_pressed(egui::Key::Escape),
            )
        });

        self.handle_file_hover(ctx);

        if let Some(pos) = pointer {
            self.session.pointer_move(pos.x, pos.y);
        }

        if pressed && !self.session.drag().is_active() {
            if let Some(pos) = pointer.filter(|p| canvas_rect.contains(*p)) {
                if let Some(hit) = innermost(placed, pos) {
                    if self.session.press(hit.id, now) == GestureOutcome::Ignored {
                        self.select(hit.id);
                    }
                }
            }
        }

        if let GestureOutcome::DragStarted(id) = self.session.tick(now) {
            self.status_message = format!("Dragging {}", self.block_name(id));
        }
        if self.session.drag().is_active() && !self.session.drag().is_dragging() {
            ctx.request_repaint_after(self.session.drag().press_hold());
        }

        if self.session.drag().is_dragging() {
            let target = pointer.and_then(|pos| {
                if self.session.drag().trash_visible() && trash_rect.contains(pos) {
                    Some(self.session.tree().trash())
                } else if canvas_rect.contains(pos) {
                    innermost(placed, pos).map(|hit| hit.id)
                } else {
                    None
                }
            });

            if target != self.ui_state.hover_target {
                if let Some(previous) = self.ui_state.hover_target {
                    self.session.leave(previous);
                }
                if let Some(target) = target {
                    if let Err(e) = self.session.enter(target) {
                        self.status_message = format!("❌ {}", e);
                    }
                }
                self.ui_state.hover_target = target;
            }

            let hovered_kind = match (self.session.drag().candidate(), pointer) {
                (Some((target, offers, _)), Some(pos)) if target != self.session.tree().trash() => {
                    placed
                        .iter()
                        .find(|p| p.id == target)
                        .and_then(|p| affordance_at(p.rect, offers, pos))
                }
                _ => None,
            };
            if self.session.drag().candidate().map(|(t, _, _)| t) != Some(self.session.tree().trash()) {
                self.session.hover_affordance(hovered_kind);
            }
            ctx.request_repaint();
        }

        if escape && self.session.drag().is_active() {
            let result = self.session.cancel();
            self.finish_gesture(result);
        } else if released && !self.ui_state.file_drag && self.session.drag().is_active() {
            let result = self.session.release();
            self.finish_gesture(result);
        }
    }

    /// Files dragged over the window become fresh file placeholders
    fn handle_file_hover(&mut self, ctx: &egui::Context) {
        let (hovered, dropped) = ctx.input(|i| {
            let hovered = i
                .raw
                .hovered_files
                .first()
                .and_then(|f| f.path.as_ref())
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned());
            (hovered, !i.raw.dropped_files.is_empty())
        });

        if self.ui_state.file_drag {
            if dropped {
                self.ui_state.file_drag = false;
                let result = self.session.release();
                self.finish_gesture(result);
            } else if hovered.is_none() {
                self.ui_state.file_drag = false;
                let result = self.session.cancel();
                self.finish_gesture(result);
            }
        } else if let Some(filename) = hovered {
            if !self.session.drag().is_active() {
                match self.session.drag_file(&filename) {
                    Ok(_) => {
                        self.ui_state.file_drag = true;
                        self.status_message = format!("Drop {} on a block that takes files", filename);
                    }
                    Err(e) => self.status_message = format!("❌ {}", e),
                }
            }
        }
    }

    fn finish_gesture(&mut self, result: crate::Result<GestureOutcome>) {
        self.ui_state.hover_target = None;
        match result {
            Ok(GestureOutcome::Click(id)) => self.select(id),
            Ok(GestureOutcome::Committed { source, target, kind }) => {
                self.status_message = format!(
                    "✓ Dropped {} {} {}",
                    self.block_name(source),
                    kind,
                    self.block_name(target)
                );
            }
            Ok(GestureOutcome::Cancelled(_)) => {
                self.status_message = "Drag cancelled".to_string();
            }
            Ok(_) => {}
            Err(e) => self.status_message = format!("❌ {}", e),
        }
        if self
            .selected_block
            .map_or(false, |id| self.session.tree().get(id).is_none())
        {
            self.selected_block = None;
        }
    }

    fn select(&mut self, id: Ulid) {
        self.selected_block = Some(id);
        self.status_message = format!("Selected: {}", self.block_name(id));
    }

    fn block_name(&self, id: Ulid) -> String {
        self.session
            .tree()
            .get(id)
            .map(|b| b.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn draw_block(&self, painter: &egui::Painter, placed: &Placed) {
        let tree = self.session.tree();
        if placed.id == tree.root() {
            return;
        }
        let Ok(view) = tree.view(placed.id) else {
            return;
        };

        let fill = match view.shape {
            Shape::Leaf => Color32::from_rgb(240, 240, 240),
            Shape::List => Color32::from_rgb(230, 240, 255),
            Shape::Split => Color32::from_rgb(255, 245, 225),
            Shape::Branch => Color32::from_rgb(250, 250, 250),
            Shape::File => Color32::from_rgb(230, 255, 230),
            Shape::Trash => Color32::from_rgb(235, 235, 235),
        };
        let dragged = self.session.drag().is_dragging() && self.session.drag().source() == Some(placed.id);
        let fill = if dragged { fill.gamma_multiply(0.4) } else { fill };

        let (stroke_color, stroke_width) = if Some(placed.id) == self.selected_block {
            (Color32::BLUE, 3.0)
        } else {
            match self.validation_issues.get(&placed.id) {
                Some(ValidationSeverity::Error) => (Color32::RED, 2.0),
                Some(ValidationSeverity::Warning) => (Color32::from_rgb(255, 165, 0), 2.0),
                Some(ValidationSeverity::Info) => (Color32::LIGHT_BLUE, 1.5),
                None => (Color32::DARK_GRAY, 1.0),
            }
        };

        painter.rect(placed.rect, 4.0, fill, Stroke::new(stroke_width, stroke_color));
        painter.text(
            placed.rect.left_top() + vec2(6.0, 4.0),
            Align2::LEFT_TOP,
            &view.title,
            FontId::proportional(13.0),
            Color32::DARK_GRAY,
        );
        if view.shape == Shape::Leaf && !view.description.is_empty() {
            painter.text(
                placed.rect.left_top() + vec2(6.0, 20.0),
                Align2::LEFT_TOP,
                &view.description,
                FontId::proportional(10.0),
                Color32::GRAY,
            );
        }
    }

    fn draw_affordances(&self, painter: &egui::Painter, placed: &[Placed], trash_rect: Rect) {
        let Some((target, offers, active)) = self.session.drag().candidate() else {
            return;
        };
        let rect = if target == self.session.tree().trash() {
            trash_rect
        } else {
            match placed.iter().find(|p| p.id == target) {
                Some(p) => p.rect,
                None => return,
            }
        };

        for kind in offers {
            let zone = affordance_rect(rect, *kind);
            let color = if Some(*kind) == active {
                Color32::from_rgba_unmultiplied(60, 120, 255, 110)
            } else {
                Color32::from_rgba_unmultiplied(60, 120, 255, 35)
            };
            painter.rect_filled(zone, 2.0, color);
        }
    }

    fn draw_proxy(&self, ctx: &egui::Context) {
        let (Some(proxy), Some(source)) = (self.session.drag().proxy(), self.session.drag().source())
        else {
            return;
        };
        let painter = ctx.layer_painter(egui::LayerId::new(
            egui::Order::Tooltip,
            egui::Id::new("drag_proxy"),
        ));
        let rect = Rect::from_min_size(pos2(proxy.x + 8.0, proxy.y + 8.0), vec2(160.0, 28.0));
        painter.rect(
            rect,
            4.0,
            Color32::from_rgba_unmultiplied(255, 255, 255, 220),
            Stroke::new(1.0, Color32::DARK_GRAY),
        );
        painter.text(
            rect.left_center() + vec2(6.0, 0.0),
            Align2::LEFT_CENTER,
            self.block_name(source),
            FontId::proportional(13.0),
            Color32::BLACK,
        );
    }
}

/// Lay the receipe out top-down; the root fills the canvas
fn layout(tree: &Tree, canvas_rect: Rect) -> Vec<Placed> {
    let mut out = vec![Placed {
        id: tree.root(),
        rect: canvas_rect,
        depth: 0,
    }];
    layout_children(
        tree,
        tree.children(tree.root()),
        canvas_rect.left_top() + vec2(PADDING, PADDING),
        (canvas_rect.width() - TRASH_SIZE - 3.0 * PADDING).max(120.0),
        1,
        &mut out,
    );
    out
}

fn layout_children(
    tree: &Tree,
    ids: &[Ulid],
    top_left: Pos2,
    width: f32,
    depth: usize,
    out: &mut Vec<Placed>,
) -> f32 {
    let mut y = top_left.y;
    for id in ids {
        let height = layout_block(tree, *id, pos2(top_left.x, y), width, depth, out);
        y += height + PADDING;
    }
    (y - top_left.y - PADDING).max(0.0)
}

fn layout_block(
    tree: &Tree,
    id: Ulid,
    top_left: Pos2,
    width: f32,
    depth: usize,
    out: &mut Vec<Placed>,
) -> f32 {
    let Some(block) = tree.get(id) else {
        return 0.0;
    };
    let index = out.len();
    out.push(Placed {
        id,
        rect: Rect::NOTHING,
        depth,
    });

    let height = match &block.kind {
        BlockKind::List { children, .. } => {
            let inner = layout_children(
                tree,
                children,
                top_left + vec2(PADDING, HEADER_HEIGHT),
                width - 2.0 * PADDING,
                depth + 1,
                out,
            );
            HEADER_HEIGHT + inner.max(ROW_HEIGHT * 0.6) + PADDING
        }
        BlockKind::Split { branches, .. } if !branches.is_empty() => {
            let n = branches.len() as f32;
            let branch_width = ((width - PADDING * (n + 1.0)) / n).max(60.0);
            let mut tallest: f32 = 0.0;
            for (i, branch) in branches.iter().enumerate() {
                let x = top_left.x + PADDING + i as f32 * (branch_width + PADDING);
                let height = layout_block(
                    tree,
                    *branch,
                    pos2(x, top_left.y + HEADER_HEIGHT),
                    branch_width,
                    depth + 1,
                    out,
                );
                tallest = tallest.max(height);
            }
            HEADER_HEIGHT + tallest + PADDING
        }
        BlockKind::Split { .. } => HEADER_HEIGHT + ROW_HEIGHT,
        _ => ROW_HEIGHT,
    };

    out[index].rect = Rect::from_min_size(top_left, vec2(width, height));
    height
}

/// Deepest block under the pointer
fn innermost(placed: &[Placed], pos: Pos2) -> Option<&Placed> {
    placed
        .iter()
        .filter(|p| p.rect.contains(pos))
        .max_by_key(|p| p.depth)
}

fn affordance_rect(rect: Rect, kind: DropKind) -> Rect {
    let (w, h) = (rect.width(), rect.height());
    match kind {
        DropKind::Before => Rect::from_min_size(rect.min, vec2(w, h * 0.35)),
        DropKind::After => Rect::from_min_max(pos2(rect.min.x, rect.max.y - h * 0.35), rect.max),
        DropKind::Left => Rect::from_min_size(rect.min, vec2(w * 0.2, h)),
        DropKind::Right => Rect::from_min_max(pos2(rect.max.x - w * 0.2, rect.min.y), rect.max),
        DropKind::Into => rect.shrink(8.0),
        DropKind::Sink => rect,
    }
}

/// Offered drop kind whose zone contains `pos`
fn affordance_at(rect: Rect, offers: &[DropKind], pos: Pos2) -> Option<DropKind> {
    let precise = [
        DropKind::Left,
        DropKind::Right,
        DropKind::Before,
        DropKind::After,
        DropKind::Into,
    ]
    .into_iter()
    .find(|kind| offers.contains(kind) && affordance_rect(rect, *kind).contains(pos));
    if precise.is_some() {
        return precise;
    }

    // nearest half when the center has no affordance of its own
    let upper = pos.y < rect.center().y;
    if upper && offers.contains(&DropKind::Before) {
        Some(DropKind::Before)
    } else if !upper && offers.contains(&DropKind::After) {
        Some(DropKind::After)
    } else {
        None
    }
}

impl eframe::App for ReceipeEditorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.render_ui(ctx);
    }
}
